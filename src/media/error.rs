//! Errors surfaced by the media resolver

use crate::api::ApiError;
use crate::models::ImageKey;

/// Why a full-resolution image could not be produced
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The key addresses nothing
    #[error("image key is empty")]
    EmptyKey,
    /// The service has no image under this key
    #[error("image {key} not found")]
    NotFound {
        /// Image key
        key: ImageKey,
    },
    /// The service call failed
    #[error("failed to fetch image {key}: {source}")]
    Api {
        /// Image key
        key: ImageKey,
        /// Underlying client error
        #[source]
        source: ApiError,
    },
    /// The key was released while the fetch was running
    #[error("image {key} was released while loading")]
    Released {
        /// Image key
        key: ImageKey,
    },
    /// A concurrent fetch for the same key did not produce an image
    #[error("image {key} could not be loaded")]
    Unresolved {
        /// Image key
        key: ImageKey,
    },
    /// The resolver's scope has ended
    #[error("media scope has been released")]
    ScopeClosed,
}

impl MediaError {
    pub(crate) fn from_api(key: &ImageKey, source: ApiError) -> Self {
        if source.is_not_found() {
            Self::NotFound { key: key.clone() }
        } else {
            Self::Api {
                key: key.clone(),
                source,
            }
        }
    }

    /// Whether trying again later could succeed
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::EmptyKey | Self::NotFound { .. } | Self::ScopeClosed)
    }
}
