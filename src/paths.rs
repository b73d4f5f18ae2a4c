//! Common paths for reunion data storage
//!
//! Everything lives under ~/.config/reunion/:
//! - config.toml - User configuration
//! - downloads/ - Images saved by `reunion image`

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the reunion data directory (~/.config/reunion/)
pub fn reunion_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(".config").join("reunion");
    fs::create_dir_all(&dir).context("Failed to create reunion directory")?;
    Ok(dir)
}

/// Get the config file path (~/.config/reunion/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(reunion_dir()?.join("config.toml"))
}

/// Get the download directory (~/.config/reunion/downloads/)
pub fn downloads_dir() -> Result<PathBuf> {
    let dir = reunion_dir()?.join("downloads");
    fs::create_dir_all(&dir).context("Failed to create downloads directory")?;
    Ok(dir)
}
