//! Scripted in-memory services for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{AdventApi, ApiError, MediaApi, MediaPayload};
use crate::models::{AdventEntry, AdventView, ImageKey};

/// Scripted answer for one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok,
    NotFound,
    Status(u16),
}

/// One thumbnail fetch as seen by the fake
#[derive(Debug, Clone)]
pub(crate) struct FetchRecord {
    pub(crate) key: ImageKey,
    /// Thumbnail fetches that had finished when this one started
    pub(crate) completed_before: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    latency: Duration,
    thumbnail_script: Mutex<HashMap<ImageKey, VecDeque<Reply>>>,
    full_script: Mutex<HashMap<ImageKey, VecDeque<Reply>>>,
    thumbnail_log: Mutex<Vec<FetchRecord>>,
    generation_log: Mutex<Vec<ImageKey>>,
    full_log: Mutex<Vec<ImageKey>>,
    fail_generation: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: AtomicUsize,
    advents: Mutex<Vec<AdventEntry>>,
    deleted: Mutex<Vec<String>>,
}

/// In-memory media (and advent) service. Clones share state.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeMediaApi {
    state: Arc<FakeState>,
}

fn next_reply(script: &Mutex<HashMap<ImageKey, VecDeque<Reply>>>, key: &ImageKey) -> Reply {
    script
        .lock()
        .unwrap()
        .get_mut(key)
        .and_then(VecDeque::pop_front)
        .unwrap_or(Reply::Ok)
}

fn answer(reply: Reply, body: String) -> Result<MediaPayload, ApiError> {
    match reply {
        Reply::Ok => Ok(MediaPayload {
            bytes: body.into_bytes(),
            content_type: Some("image/jpeg".to_string()),
        }),
        Reply::NotFound => Err(ApiError::Status {
            status: 404,
            message: "Not Found".to_string(),
        }),
        Reply::Status(status) => Err(ApiError::Status {
            status,
            message: "scripted failure".to_string(),
        }),
    }
}

impl FakeMediaApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            state: Arc::new(FakeState {
                latency,
                ..FakeState::default()
            }),
        }
    }

    pub(crate) fn script_thumbnail(&self, key: &str, replies: impl IntoIterator<Item = Reply>) {
        self.state
            .thumbnail_script
            .lock()
            .unwrap()
            .entry(ImageKey::new(key))
            .or_default()
            .extend(replies);
    }

    pub(crate) fn script_full(&self, key: &str, replies: impl IntoIterator<Item = Reply>) {
        self.state
            .full_script
            .lock()
            .unwrap()
            .entry(ImageKey::new(key))
            .or_default()
            .extend(replies);
    }

    pub(crate) fn fail_generation(&self) {
        self.state.fail_generation.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_advents(&self, entries: Vec<AdventEntry>) {
        *self.state.advents.lock().unwrap() = entries;
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().unwrap().clone()
    }

    pub(crate) fn fetch_log(&self) -> Vec<FetchRecord> {
        self.state.thumbnail_log.lock().unwrap().clone()
    }

    pub(crate) fn thumbnail_calls(&self, key: &ImageKey) -> usize {
        self.fetch_log().iter().filter(|r| &r.key == key).count()
    }

    pub(crate) fn total_thumbnail_calls(&self) -> usize {
        self.state.thumbnail_log.lock().unwrap().len()
    }

    pub(crate) fn generation_calls(&self, key: &ImageKey) -> usize {
        self.state
            .generation_log
            .lock()
            .unwrap()
            .iter()
            .filter(|k| *k == key)
            .count()
    }

    pub(crate) fn full_calls(&self, key: &ImageKey) -> usize {
        self.state
            .full_log
            .lock()
            .unwrap()
            .iter()
            .filter(|k| *k == key)
            .count()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if !self.state.latency.is_zero() {
            tokio::time::sleep(self.state.latency).await;
        }
    }
}

impl MediaApi for FakeMediaApi {
    async fn fetch_thumbnail(&self, key: &ImageKey) -> Result<MediaPayload, ApiError> {
        self.state.thumbnail_log.lock().unwrap().push(FetchRecord {
            key: key.clone(),
            completed_before: self.state.completed.load(Ordering::SeqCst),
        });
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        self.wait().await;

        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        answer(next_reply(&self.state.thumbnail_script, key), format!("thumb:{key}"))
    }

    async fn request_thumbnail_generation(&self, key: &ImageKey) -> Result<(), ApiError> {
        self.state.generation_log.lock().unwrap().push(key.clone());
        if self.state.fail_generation.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 502,
                message: "generation unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn fetch_full_image(&self, key: &ImageKey) -> Result<MediaPayload, ApiError> {
        self.state.full_log.lock().unwrap().push(key.clone());
        self.wait().await;
        answer(next_reply(&self.state.full_script, key), format!("full:{key}"))
    }
}

impl AdventApi for FakeMediaApi {
    async fn advents(&self, _view: AdventView) -> Result<Vec<AdventEntry>, ApiError> {
        Ok(self.state.advents.lock().unwrap().clone())
    }

    async fn delete_advent(&self, id: &str) -> Result<(), ApiError> {
        let mut advents = self.state.advents.lock().unwrap();
        let before = advents.len();
        advents.retain(|entry| entry.id != id);
        if advents.len() == before {
            return Err(ApiError::Status {
                status: 404,
                message: "Advent not found".to_string(),
            });
        }
        self.state.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
