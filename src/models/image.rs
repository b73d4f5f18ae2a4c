//! Photo gallery metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{HasImageKey, ImageKey};

/// Metadata for an uploaded photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Server-side ID
    #[serde(default)]
    pub id: Option<String>,
    /// Key of the stored image
    #[serde(default)]
    pub image_key: Option<ImageKey>,
    /// Optional title
    #[serde(default)]
    pub title: Option<String>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form tags
    #[serde(default)]
    pub image_tags: Vec<String>,
    /// Who uploaded the photo
    #[serde(default)]
    pub uploaded_by: Option<String>,
    /// When the photo was uploaded
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Server-rendered thumbnail URL, once generated
    #[serde(default)]
    pub thumbnail_xl_url: Option<String>,
}

impl HasImageKey for ImageMetadata {
    fn image_key(&self) -> Option<&ImageKey> {
        self.image_key.as_ref()
    }
}

/// One page of gallery results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePage {
    /// Photos on this page
    #[serde(default)]
    pub items: Vec<ImageMetadata>,
    /// Cursor for the next page (None when exhausted)
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ImagePage {
    /// Whether another page is available
    pub const fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Items sorted newest first (photos without a timestamp sink to the end)
    pub fn sorted_newest_first(mut self) -> Vec<ImageMetadata> {
        self.items
            .sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        self.items
    }
}

/// Which photos to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhotoFilter {
    /// Everything
    #[default]
    All,
    /// Uploaded by me
    ByMe,
    /// Uploaded for me
    ForMe,
}

impl PhotoFilter {
    /// API path suffix
    pub const fn path(&self) -> &'static str {
        match self {
            Self::All => "",
            Self::ByMe => "/by_me",
            Self::ForMe => "/for_me",
        }
    }

    /// Parse from a CLI argument
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "all" => Some(Self::All),
            "by-me" => Some(Self::ByMe),
            "for-me" => Some(Self::ForMe),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let json = r#"{
            "items": [
                {"id": "1", "image_key": "a.jpg", "uploaded_at": "2025-01-01T00:00:00Z"},
                {"id": "2", "image_key": null, "image_tags": ["garden"]},
                {"id": "3", "image_key": "c.jpg", "uploaded_at": "2025-06-01T00:00:00Z",
                 "thumbnail_xl_url": "/thumbs/c.jpg"}
            ],
            "next_cursor": "abc"
        }"#;
        let page: ImagePage = serde_json::from_str(json).unwrap();
        assert!(page.has_more());

        let sorted = page.sorted_newest_first();
        let ids: Vec<_> = sorted.iter().filter_map(|p| p.id.as_deref()).collect();
        assert_eq!(ids, ["3", "1", "2"]);
        assert!(sorted[2].image_key().is_none());
    }
}
