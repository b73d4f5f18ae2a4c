//! Local, revocable handles to in-memory image data.
//!
//! A [`LocalHandle`] plays the role a browser object URL plays for a web
//! view: a cheap locator that renders without re-fetching, valid until it is
//! revoked. The bytes themselves live in a [`HandleStore`]; revoking drops
//! them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::api::MediaPayload;

/// Content type used when neither the service nor the bytes say otherwise
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Locator for image bytes held by a [`HandleStore`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalHandle {
    url: Arc<str>,
    content_type: Arc<str>,
    size: usize,
}

impl LocalHandle {
    /// The `blob:` locator
    pub fn url(&self) -> &str {
        &self.url
    }

    /// MIME type of the referenced data
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Size of the referenced data in bytes
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    live: HashMap<Arc<str>, Arc<[u8]>>,
    created: u64,
    revoked: u64,
}

/// Thread-safe registry of live handles
#[derive(Debug, Clone, Default)]
pub struct HandleStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl HandleStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of a payload and hand out a locator for it.
    pub fn create(&self, payload: MediaPayload) -> LocalHandle {
        let content_type = payload
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .or_else(|| sniff_content_type(&payload.bytes))
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        let url: Arc<str> = format!("blob:reunion/{}", Uuid::new_v4()).into();
        let handle = LocalHandle {
            url: Arc::clone(&url),
            content_type: content_type.into(),
            size: payload.bytes.len(),
        };

        let mut inner = self.lock();
        inner.live.insert(url, payload.bytes.into());
        inner.created += 1;
        handle
    }

    /// Dereference a handle. `None` once it has been revoked.
    pub fn resolve(&self, handle: &LocalHandle) -> Option<Arc<[u8]>> {
        self.lock().live.get(&handle.url).cloned()
    }

    /// Revoke a handle, dropping its bytes.
    ///
    /// Returns `false` if the handle was already revoked.
    pub fn revoke(&self, handle: &LocalHandle) -> bool {
        let mut inner = self.lock();
        if inner.live.remove(&handle.url).is_some() {
            inner.revoked += 1;
            true
        } else {
            tracing::debug!("Handle {} already revoked", handle.url);
            false
        }
    }

    /// Whether a handle can still be dereferenced
    pub fn is_live(&self, handle: &LocalHandle) -> bool {
        self.lock().live.contains_key(&handle.url)
    }

    /// Number of live handles
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Total handles ever created
    pub fn created_count(&self) -> u64 {
        self.lock().created
    }

    /// Total handles revoked
    pub fn revoked_count(&self) -> u64 {
        self.lock().revoked
    }
}

fn sniff_content_type(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}
