//! Advent calendar entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{HasImageKey, ImageKey};

/// Kind of surprise hidden behind an advent door
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdventKind {
    /// A shared ritual
    Ritual,
    /// A memory together
    #[default]
    Memory,
    /// A surprise
    Surprise,
    /// Something playful
    Play,
    /// A caring gesture
    Care,
}

impl AdventKind {
    /// Display name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ritual => "Ritual",
            Self::Memory => "Memory",
            Self::Surprise => "Surprise",
            Self::Play => "Play",
            Self::Care => "Care",
        }
    }
}

impl std::fmt::Display for AdventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which side of the calendar to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdventView {
    /// Entries the other person made for me
    #[default]
    ForMe,
    /// Entries I made
    ByMe,
}

impl AdventView {
    /// API path segment
    pub const fn path(&self) -> &'static str {
        match self {
            Self::ForMe => "for_me",
            Self::ByMe => "by_me",
        }
    }

    /// Parse from a CLI argument
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "for-me" | "forme" => Some(Self::ForMe),
            "by-me" | "byme" => Some(Self::ByMe),
            _ => None,
        }
    }
}

/// First and last door of the calendar
pub const ADVENT_DAYS: std::ops::RangeInclusive<u8> = 1..=24;

/// An advent calendar entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdventEntry {
    /// Server-side ID
    pub id: String,
    /// Calendar day (1-24)
    pub day: u8,
    /// Short title
    pub title: String,
    /// Longer description
    #[serde(default)]
    pub description: String,
    /// Kind of entry
    #[serde(rename = "type", default)]
    pub kind: AdventKind,
    /// Attached image, if any
    #[serde(default)]
    pub image_key: Option<ImageKey>,
    /// Who created the entry
    #[serde(default)]
    pub created_by: Option<String>,
    /// When the entry was created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AdventEntry {
    /// Whether the entry falls on a valid calendar day
    pub fn has_valid_day(&self) -> bool {
        ADVENT_DAYS.contains(&self.day)
    }
}

impl HasImageKey for AdventEntry {
    fn image_key(&self) -> Option<&ImageKey> {
        self.image_key.as_ref()
    }
}
