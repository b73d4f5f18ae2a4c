//! Data models for the reunion services

mod advent;
mod image;
mod image_key;

pub use advent::{ADVENT_DAYS, AdventEntry, AdventKind, AdventView};
pub use image::{ImageMetadata, ImagePage, PhotoFilter};
pub use image_key::{HasImageKey, ImageKey};
