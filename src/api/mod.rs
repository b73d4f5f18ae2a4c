//! API clients for the reunion services
//!
//! The media resolver only ever talks to [`MediaApi`]; the listing views
//! additionally use [`AdventApi`] and [`ImageIndexApi`]. [`HttpMediaClient`]
//! implements all three over HTTP.

mod client;

pub use client::{HttpMediaClient, SESSION_HEADER};

use std::future::Future;

use crate::models::{AdventEntry, AdventView, ImageKey, ImagePage, PhotoFilter};

/// Errors returned by the service clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No session id configured
    #[error("no active session")]
    NoSession,
    /// The service answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or a short description
        message: String,
    },
    /// The request never produced a response (or its body could not be read)
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// HTTP status code, if the service answered
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the service answered 404
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }
}

/// Binary payload of a fetched image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// `Content-Type` reported by the service
    pub content_type: Option<String>,
}

impl MediaPayload {
    /// Payload without a declared content type
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: None,
        }
    }
}

/// Operations the media resolver needs from the image service.
///
/// Futures must be `Send` so retries can run on spawned tasks.
pub trait MediaApi: Send + Sync + 'static {
    /// Fetch the thumbnail for `key`. A 404 means "not generated yet".
    fn fetch_thumbnail(
        &self,
        key: &ImageKey,
    ) -> impl Future<Output = Result<MediaPayload, ApiError>> + Send;

    /// Ask the service to generate the thumbnail for `key`
    fn request_thumbnail_generation(
        &self,
        key: &ImageKey,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Fetch the full-resolution image for `key`
    fn fetch_full_image(
        &self,
        key: &ImageKey,
    ) -> impl Future<Output = Result<MediaPayload, ApiError>> + Send;
}

/// Advent calendar service
pub trait AdventApi: Send + Sync {
    /// List entries for one side of the calendar
    fn advents(
        &self,
        view: AdventView,
    ) -> impl Future<Output = Result<Vec<AdventEntry>, ApiError>> + Send;

    /// Delete an entry
    fn delete_advent(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Photo gallery index service
pub trait ImageIndexApi: Send + Sync {
    /// List one page of photo metadata
    fn list_images(
        &self,
        filter: PhotoFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<ImagePage, ApiError>> + Send;
}
