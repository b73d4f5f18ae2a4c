//! Opaque identifiers for stored images

use serde::{Deserialize, Serialize};

/// Opaque identifier for a stored binary asset.
///
/// Keys are unique per asset and never reused after deletion. An empty key
/// never addresses anything and is skipped by the media resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    /// Wrap a raw key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty (addresses nothing)
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Percent-encoded form for use as a URL path segment
    pub fn encoded(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Anything that may reference a stored image.
///
/// Listing views hand sequences of these to
/// [`MediaResolver::load_batch`](crate::media::MediaResolver::load_batch).
pub trait HasImageKey {
    /// The image key carried by this entity, if any
    fn image_key(&self) -> Option<&ImageKey>;
}

impl HasImageKey for ImageKey {
    fn image_key(&self) -> Option<&ImageKey> {
        Some(self)
    }
}

impl HasImageKey for Option<ImageKey> {
    fn image_key(&self) -> Option<&ImageKey> {
        self.as_ref()
    }
}
