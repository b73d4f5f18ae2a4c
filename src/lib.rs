//! # reunion 💌
//!
//! Media resolver and command-line client for the reunion countdown services.
//!
//! ## Overview
//!
//! The reunion services store photos and advent calendar surprises behind
//! opaque image keys. This crate turns those keys into local, revocable
//! handles: it fetches thumbnails in bounded waves, keeps one fetch per key in
//! flight, asks the service to generate thumbnails that are not ready yet and
//! retries them with exponential backoff, and revokes every handle when the
//! owning scope ends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       AdventBoard / CLI                     │
//! │   Lists entities and renders whatever the cache resolved    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MediaResolver                         │
//! │ • ensure_thumbnail / ensure_full_image (single-flight)      │
//! │ • load_batch (waves of 4)                                   │
//! │ • 404 → generation request + backoff retry (2s, 4s, 8s, 16s)│
//! │ • release / release_all (handles revoked exactly once)      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   HandleStore   │ │       API       │ │     Config      │
//! │                 │ │                 │ │                 │
//! │ • blob: handles │ │ • Media         │ │ • Base URL      │
//! │ • Revocation    │ │ • Advent        │ │ • Session       │
//! │                 │ │ • Gallery index │ │ • Retry tuning  │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Service clients (media, advent, gallery index)
//! - [`board`] - Advent calendar view-model
//! - [`config`] - Configuration management
//! - [`media`] - Media resolver, cache and handles
//! - [`models`] - Data models (`ImageKey`, `AdventEntry`, `ImageMetadata`)
//! - [`paths`] - Data directories
//!
//! ## Example
//!
//! ```no_run
//! use reunion::{AdventBoard, Config, HttpMediaClient};
//! use reunion::models::AdventView;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let client = HttpMediaClient::from_config(&config)?;
//! let mut board = AdventBoard::new(client, AdventView::ForMe, &config.media);
//! let summary = board.load().await?;
//! println!("{} thumbnails ready", summary.ready);
//! board.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::future_not_send)]

pub mod api;
pub mod board;
pub mod config;
pub mod media;
pub mod models;
pub mod paths;

// Re-export main types for convenience
pub use api::{ApiError, HttpMediaClient, MediaApi};
pub use board::AdventBoard;
pub use config::Config;
pub use media::{LocalHandle, MediaError, MediaEvent, MediaResolver, ThumbnailOutcome};
pub use models::ImageKey;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
