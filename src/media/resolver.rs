//! Resolves image keys to local handles.
//!
//! One [`MediaResolver`] is created per consuming scope (a view, a CLI
//! command) and torn down with [`MediaResolver::release_all`]. Clones share
//! the same caches.
//!
//! Thumbnails that the service has not generated yet (HTTP 404) are retried
//! with exponential backoff after asking the service to generate them. Full
//! images are never retried; failures go back to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{MediaApi, MediaPayload};
use crate::config::MediaConfig;
use crate::models::{HasImageKey, ImageKey};

use super::cache::MediaCache;
use super::retry::{self, RetryPolicy, RetryState};
use super::{HandleStore, LocalHandle, MediaError, MediaEvent, MediaEvents};

/// Result of [`MediaResolver::ensure_thumbnail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    /// The thumbnail is cached
    Ready(LocalHandle),
    /// A fetch or retry for this key is already running
    InFlight,
    /// Not generated yet; a retry is scheduled
    Retrying {
        /// Retry number (1-based)
        attempt: u32,
        /// Delay before the retry fires
        delay: Duration,
    },
    /// Retries are exhausted for this key
    Stalled,
    /// The fetch failed and will not be retried
    Failed,
    /// Nothing to do (empty key, released key, or closed scope)
    Skipped,
}

/// Tally of a [`MediaResolver::load_batch`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Sequential waves issued
    pub waves: usize,
    /// Distinct keys that needed a fetch
    pub requested: usize,
    /// Keys now cached
    pub ready: usize,
    /// Keys waiting on a retry
    pub retrying: usize,
    /// Keys that gave up
    pub stalled: usize,
    /// Keys that failed outright
    pub failed: usize,
    /// Keys already in flight or skipped
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &ThumbnailOutcome) {
        match outcome {
            ThumbnailOutcome::Ready(_) => self.ready += 1,
            ThumbnailOutcome::Retrying { .. } => self.retrying += 1,
            ThumbnailOutcome::Stalled => self.stalled += 1,
            ThumbnailOutcome::Failed => self.failed += 1,
            ThumbnailOutcome::InFlight | ThumbnailOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// A running full-image fetch that other callers can wait on
#[derive(Debug)]
struct FullFlight {
    id: u64,
    done: Arc<Notify>,
}

/// How a caller takes part in a full-image fetch
enum FullJoin {
    /// Runs the fetch (flight id)
    Lead(u64, Arc<Notify>),
    /// Waits for someone else's fetch
    Wait(Arc<Notify>),
}

/// Which in-flight marker a [`FlightGuard`] owns
enum Flight {
    Thumbnail,
    Full(Arc<Notify>),
}

/// Clears an in-flight marker if the fetch future is dropped before the
/// service answers, so the key can be fetched again.
struct FlightGuard<'a, A> {
    resolver: &'a MediaResolver<A>,
    key: &'a ImageKey,
    id: u64,
    flight: Flight,
    armed: bool,
}

impl<'a, A> FlightGuard<'a, A> {
    fn new(resolver: &'a MediaResolver<A>, key: &'a ImageKey, id: u64, flight: Flight) -> Self {
        Self {
            resolver,
            key,
            id,
            flight,
            armed: true,
        }
    }

    /// The fetch settled; the caller finishes the bookkeeping itself.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<A> Drop for FlightGuard<'_, A> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.resolver.state();
        match &self.flight {
            Flight::Thumbnail => {
                if state.end_thumbnail(self.key, self.id) {
                    debug!("Thumbnail fetch for {} abandoned", self.key);
                }
            }
            Flight::Full(done) => {
                if state.end_full(self.key, self.id) {
                    debug!("Full image fetch for {} abandoned", self.key);
                }
                drop(state);
                // Waiters find no image and report it unresolved
                done.notify_waiters();
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    thumbnails: MediaCache,
    full_images: MediaCache,
    /// Key -> id of the thumbnail fetch currently running
    thumbnail_flights: HashMap<ImageKey, u64>,
    full_flights: HashMap<ImageKey, FullFlight>,
    retries: HashMap<ImageKey, RetryState>,
    /// Keys we already asked the service to generate
    requested: HashSet<ImageKey>,
    stalled: HashSet<ImageKey>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn begin_thumbnail(&mut self, key: &ImageKey) -> u64 {
        let id = self.next_id();
        self.thumbnail_flights.insert(key.clone(), id);
        id
    }

    /// Clear the in-flight marker if it still belongs to `flight`.
    fn end_thumbnail(&mut self, key: &ImageKey, flight: u64) -> bool {
        if self.thumbnail_flights.get(key) == Some(&flight) {
            self.thumbnail_flights.remove(key);
            true
        } else {
            false
        }
    }

    fn end_full(&mut self, key: &ImageKey, flight: u64) -> bool {
        if self.full_flights.get(key).map(|f| f.id) == Some(flight) {
            self.full_flights.remove(key);
            true
        } else {
            false
        }
    }

    fn has_pending_retry(&self, key: &ImageKey) -> bool {
        self.retries
            .get(key)
            .is_some_and(|retry| retry.pending.is_some())
    }
}

struct Inner<A> {
    api: A,
    handles: HandleStore,
    policy: RetryPolicy,
    batch_size: usize,
    scope: CancellationToken,
    events: mpsc::UnboundedSender<MediaEvent>,
    state: Mutex<State>,
}

/// Media resolver and cache
pub struct MediaResolver<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for MediaResolver<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for MediaResolver<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResolver")
            .field("policy", &self.inner.policy)
            .field("batch_size", &self.inner.batch_size)
            .field("alive", &!self.inner.scope.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<A> MediaResolver<A> {
    /// Create a resolver and the receiver for its events.
    pub fn new(api: A, config: &MediaConfig) -> (Self, MediaEvents) {
        let (events, rx) = MediaEvents::channel();
        let resolver = Self {
            inner: Arc::new(Inner {
                api,
                handles: HandleStore::new(),
                policy: config.retry_policy(),
                batch_size: config.batch_size.max(1),
                scope: CancellationToken::new(),
                events,
                state: Mutex::new(State::default()),
            }),
        };
        (resolver, rx)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MediaEvent) {
        // Nobody listening is fine
        let _ = self.inner.events.send(event);
    }

    fn is_closed(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    /// Store the handles are created in (to dereference them)
    pub fn handles(&self) -> &HandleStore {
        &self.inner.handles
    }

    /// The service client
    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Whether the scope is still open
    pub fn is_alive(&self) -> bool {
        !self.is_closed()
    }

    /// Cached thumbnail for `key`
    pub fn thumbnail(&self, key: &ImageKey) -> Option<LocalHandle> {
        self.state().thumbnails.get(key).cloned()
    }

    /// Cached full image for `key`
    pub fn full_image(&self, key: &ImageKey) -> Option<LocalHandle> {
        self.state().full_images.get(key).cloned()
    }

    /// Current key -> thumbnail mapping, for rendering
    pub fn snapshot(&self) -> HashMap<ImageKey, LocalHandle> {
        self.state().thumbnails.snapshot()
    }

    /// Current key -> full image mapping
    pub fn full_image_snapshot(&self) -> HashMap<ImageKey, LocalHandle> {
        self.state().full_images.snapshot()
    }

    /// Retries made so far for a key still cycling through 404s
    pub fn retry_attempts(&self, key: &ImageKey) -> u32 {
        self.state().retries.get(key).map_or(0, |retry| retry.attempts)
    }

    /// Whether `key` gave up after exhausting its retries
    pub fn is_stalled(&self, key: &ImageKey) -> bool {
        self.state().stalled.contains(key)
    }
}

impl<A: MediaApi> MediaResolver<A> {
    /// Make sure the thumbnail for `key` is cached, fetching it if needed.
    pub async fn ensure_thumbnail(&self, key: &ImageKey) -> ThumbnailOutcome {
        if key.is_empty() {
            return ThumbnailOutcome::Skipped;
        }

        let flight = {
            let mut state = self.state();
            if self.is_closed() {
                return ThumbnailOutcome::Skipped;
            }
            if let Some(handle) = state.thumbnails.get(key) {
                return ThumbnailOutcome::Ready(handle.clone());
            }
            if state.thumbnail_flights.contains_key(key) || state.has_pending_retry(key) {
                return ThumbnailOutcome::InFlight;
            }
            if state.stalled.contains(key) {
                return ThumbnailOutcome::Stalled;
            }
            state.begin_thumbnail(key)
        };

        self.fetch_thumbnail(key, flight).await
    }

    async fn fetch_thumbnail(&self, key: &ImageKey, flight: u64) -> ThumbnailOutcome {
        debug!("Fetching thumbnail {key}");

        let guard = FlightGuard::new(self, key, flight, Flight::Thumbnail);
        let result = self.inner.api.fetch_thumbnail(key).await;
        guard.disarm();

        match result {
            Ok(payload) => self.finish_thumbnail(key, flight, payload),
            Err(err) if err.is_not_found() => self.thumbnail_not_ready(key, flight),
            Err(err) => {
                {
                    let mut state = self.state();
                    if !state.end_thumbnail(key, flight) || self.is_closed() {
                        return ThumbnailOutcome::Skipped;
                    }
                    // Any 404 cycle ends here; the next 404 starts afresh
                    if let Some(retry) = state.retries.remove(key) {
                        retry.cancel();
                    }
                }
                warn!("Failed to load thumbnail for {key}: {err}");
                self.emit(MediaEvent::ThumbnailFailed {
                    key: key.clone(),
                    error: err.to_string(),
                });
                ThumbnailOutcome::Failed
            }
        }
    }

    fn finish_thumbnail(&self, key: &ImageKey, flight: u64, payload: MediaPayload) -> ThumbnailOutcome {
        let handle = {
            let mut state = self.state();
            if !state.end_thumbnail(key, flight) || self.is_closed() {
                debug!("Discarding thumbnail {key}: released while loading");
                return ThumbnailOutcome::Skipped;
            }

            let handle = self.inner.handles.create(payload);
            let handle = state
                .thumbnails
                .insert(key.clone(), handle, &self.inner.handles);
            if let Some(retry) = state.retries.remove(key) {
                retry.cancel();
            }
            handle
        };

        self.emit(MediaEvent::ThumbnailReady { key: key.clone() });
        ThumbnailOutcome::Ready(handle)
    }

    fn thumbnail_not_ready(&self, key: &ImageKey, flight: u64) -> ThumbnailOutcome {
        let (outcome, first_request) = {
            let mut state = self.state();
            if !state.end_thumbnail(key, flight) || self.is_closed() {
                return ThumbnailOutcome::Skipped;
            }

            let first_request = state.requested.insert(key.clone());
            let attempt = state.retries.get(key).map_or(0, |r| r.attempts) + 1;

            let outcome = match self.inner.policy.delay_for(attempt) {
                Some(delay) => {
                    let id = state.next_id();
                    let pending = self.schedule_retry(key, id, delay);
                    let retry = state.retries.entry(key.clone()).or_default();
                    retry.attempts = attempt;
                    retry.pending = Some(pending);
                    ThumbnailOutcome::Retrying { attempt, delay }
                }
                None => {
                    if let Some(retry) = state.retries.remove(key) {
                        retry.cancel();
                    }
                    state.stalled.insert(key.clone());
                    ThumbnailOutcome::Stalled
                }
            };
            (outcome, first_request)
        };

        if first_request {
            self.request_generation(key);
        }

        match &outcome {
            ThumbnailOutcome::Retrying { attempt, delay } => {
                debug!("Thumbnail {key} not ready, retry {attempt} in {delay:?}");
                self.emit(MediaEvent::RetryScheduled {
                    key: key.clone(),
                    attempt: *attempt,
                    delay: *delay,
                });
            }
            _ => {
                let attempts = self.inner.policy.max_retries();
                warn!("Giving up on thumbnail {key} after {attempts} retries");
                self.emit(MediaEvent::ThumbnailStalled {
                    key: key.clone(),
                    attempts,
                });
            }
        }

        outcome
    }

    /// Ask the service to generate the thumbnail. Fire-and-forget.
    fn request_generation(&self, key: &ImageKey) {
        let resolver = self.clone();
        let key = key.clone();
        let scope = self.inner.scope.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = scope.cancelled() => {}
                result = resolver.inner.api.request_thumbnail_generation(&key) => {
                    if let Err(err) = result {
                        warn!("Failed to request thumbnail generation for {key}: {err}");
                    }
                }
            }
        });
    }

    fn schedule_retry(&self, key: &ImageKey, id: u64, delay: Duration) -> retry::PendingRetry {
        let resolver = self.clone();
        let key = key.clone();
        retry::schedule(id, delay, self.inner.scope.child_token(), async move {
            resolver.run_retry(key, id).await;
        })
    }

    async fn run_retry(&self, key: ImageKey, id: u64) {
        let flight = {
            let mut state = self.state();
            if self.is_closed() {
                return;
            }

            match state.retries.get_mut(&key) {
                Some(retry) if retry.pending.as_ref().map(|p| p.id) == Some(id) => {
                    retry.pending = None;
                }
                // Released or superseded
                _ => return,
            }

            if state.thumbnails.contains(&key) || state.thumbnail_flights.contains_key(&key) {
                return;
            }
            state.begin_thumbnail(&key)
        };

        let _ = self.fetch_thumbnail(&key, flight).await;
    }

    /// Make sure the full-resolution image for `key` is cached.
    ///
    /// Concurrent calls for the same key share one fetch. Errors are returned
    /// to the caller and nothing is retried.
    pub async fn ensure_full_image(&self, key: &ImageKey) -> Result<LocalHandle, MediaError> {
        if key.is_empty() {
            return Err(MediaError::EmptyKey);
        }

        let join = {
            let mut state = self.state();
            if self.is_closed() {
                return Err(MediaError::ScopeClosed);
            }
            if let Some(handle) = state.full_images.get(key) {
                return Ok(handle.clone());
            }

            let running = state.full_flights.get(key).map(|f| Arc::clone(&f.done));
            match running {
                Some(done) => FullJoin::Wait(done),
                None => {
                    let id = state.next_id();
                    let done = Arc::new(Notify::new());
                    state.full_flights.insert(
                        key.clone(),
                        FullFlight {
                            id,
                            done: Arc::clone(&done),
                        },
                    );
                    FullJoin::Lead(id, done)
                }
            }
        };

        match join {
            FullJoin::Lead(id, done) => self.fetch_full_image(key, id, done).await,
            FullJoin::Wait(done) => self.wait_full_image(key, &done).await,
        }
    }

    async fn fetch_full_image(
        &self,
        key: &ImageKey,
        flight: u64,
        done: Arc<Notify>,
    ) -> Result<LocalHandle, MediaError> {
        debug!("Fetching full image {key}");
        let guard = FlightGuard::new(self, key, flight, Flight::Full(Arc::clone(&done)));
        let result = self.inner.api.fetch_full_image(key).await;
        guard.disarm();

        let outcome = {
            let mut state = self.state();
            let owned = state.end_full(key, flight);
            match result {
                Ok(_) if self.is_closed() => Err(MediaError::ScopeClosed),
                Ok(_) if !owned => Err(MediaError::Released { key: key.clone() }),
                Ok(payload) => {
                    let handle = self.inner.handles.create(payload);
                    Ok(state
                        .full_images
                        .insert(key.clone(), handle, &self.inner.handles))
                }
                Err(err) => Err(MediaError::from_api(key, err)),
            }
        };
        done.notify_waiters();

        match &outcome {
            Ok(_) => self.emit(MediaEvent::FullImageReady { key: key.clone() }),
            Err(err) => warn!("Failed to load full image for {key}: {err}"),
        }
        outcome
    }

    async fn wait_full_image(&self, key: &ImageKey, done: &Notify) -> Result<LocalHandle, MediaError> {
        // Registered from here on, so a completion after the check below wakes us
        let notified = done.notified();

        {
            let state = self.state();
            if let Some(handle) = state.full_images.get(key) {
                return Ok(handle.clone());
            }
            if !state.full_flights.contains_key(key) {
                return Err(self.unresolved(key));
            }
        }

        notified.await;

        self.state()
            .full_images
            .get(key)
            .cloned()
            .ok_or_else(|| self.unresolved(key))
    }

    fn unresolved(&self, key: &ImageKey) -> MediaError {
        if self.is_closed() {
            MediaError::ScopeClosed
        } else {
            MediaError::Unresolved { key: key.clone() }
        }
    }

    /// Fetch thumbnails for a listing, a bounded wave at a time.
    ///
    /// Entities without a key, keys already cached and duplicate keys are
    /// skipped. Each wave runs concurrently and fully settles before the next
    /// one starts.
    pub async fn load_batch<T: HasImageKey>(&self, entities: &[T]) -> BatchSummary {
        let keys = self.keys_to_load(entities);
        let mut summary = BatchSummary {
            requested: keys.len(),
            ..BatchSummary::default()
        };

        for wave in keys.chunks(self.inner.batch_size) {
            if self.is_closed() {
                debug!("Scope closed, stopping batch load");
                break;
            }
            summary.waves += 1;

            let outcomes = join_all(wave.iter().map(|key| self.ensure_thumbnail(key))).await;
            for outcome in &outcomes {
                summary.record(outcome);
            }
        }

        debug!(
            "Batch load: {} keys in {} waves, {} ready, {} retrying",
            summary.requested, summary.waves, summary.ready, summary.retrying
        );
        summary
    }

    fn keys_to_load<T: HasImageKey>(&self, entities: &[T]) -> Vec<ImageKey> {
        let state = self.state();
        let mut seen = HashSet::new();
        entities
            .iter()
            .filter_map(|entity| entity.image_key())
            .filter(|key| !key.is_empty() && !state.thumbnails.contains(key))
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect()
    }
}

impl<A> MediaResolver<A> {
    /// Forget everything about `key`: revoke its handles, cancel any pending
    /// retry and drop its bookkeeping so a later request fetches afresh.
    pub fn release(&self, key: &ImageKey) {
        let (removed, waiters) = {
            let mut state = self.state();
            let handles = &self.inner.handles;
            let thumb = state.thumbnails.remove(key, handles);
            let full = state.full_images.remove(key, handles);

            state.thumbnail_flights.remove(key);
            if let Some(retry) = state.retries.remove(key) {
                retry.cancel();
            }
            state.requested.remove(key);
            state.stalled.remove(key);

            (thumb || full, state.full_flights.remove(key).map(|f| f.done))
        };

        if let Some(done) = waiters {
            done.notify_waiters();
        }
        if removed {
            debug!("Released media for {key}");
        }
    }

    /// End the scope: revoke every handle and cancel every retry.
    ///
    /// Safe to call more than once.
    pub fn release_all(&self) {
        self.inner.scope.cancel();

        let (revoked, waiters) = {
            let mut state = self.state();
            let handles = &self.inner.handles;
            let revoked = state.thumbnails.clear(handles) + state.full_images.clear(handles);

            for (_, retry) in state.retries.drain() {
                retry.cancel();
            }
            state.thumbnail_flights.clear();
            state.requested.clear();
            state.stalled.clear();

            let waiters: Vec<_> = state.full_flights.drain().map(|(_, f)| f.done).collect();
            (revoked, waiters)
        };

        for done in waiters {
            done.notify_waiters();
        }
        if revoked > 0 {
            debug!("Released {revoked} cached images");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::{FakeMediaApi, Reply};

    fn resolver(api: &FakeMediaApi) -> (MediaResolver<FakeMediaApi>, MediaEvents) {
        MediaResolver::new(api.clone(), &MediaConfig::default())
    }

    fn key(s: &str) -> ImageKey {
        ImageKey::new(s)
    }

    /// Wait until the event stream reports `key` as ready or stalled,
    /// returning every event seen on the way.
    async fn settle(events: &mut MediaEvents, key: &ImageKey) -> Vec<MediaEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.next().await {
            let done = event.key() == key
                && matches!(
                    event,
                    MediaEvent::ThumbnailReady { .. } | MediaEvent::ThumbnailStalled { .. }
                );
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn retry_delays(events: &[MediaEvent]) -> Vec<Duration> {
        events
            .iter()
            .filter_map(|event| match event {
                MediaEvent::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_thumbnail_cached_after_first_fetch() {
        let api = FakeMediaApi::new();
        let (resolver, mut events) = resolver(&api);

        let ThumbnailOutcome::Ready(handle) = resolver.ensure_thumbnail(&key("a")).await else {
            panic!("expected ready");
        };
        assert_eq!(
            resolver.handles().resolve(&handle).as_deref(),
            Some(&b"thumb:a"[..])
        );

        let second = resolver.ensure_thumbnail(&key("a")).await;
        assert_eq!(second, ThumbnailOutcome::Ready(handle));
        assert_eq!(api.thumbnail_calls(&key("a")), 1);
        assert_eq!(
            events.poll(),
            vec![MediaEvent::ThumbnailReady { key: key("a") }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_key_is_noop() {
        let api = FakeMediaApi::new();
        let (resolver, _events) = resolver(&api);

        assert_eq!(resolver.ensure_thumbnail(&key("")).await, ThumbnailOutcome::Skipped);
        assert_eq!(api.total_thumbnail_calls(), 0);
        assert!(matches!(
            resolver.ensure_full_image(&key("")).await,
            Err(MediaError::EmptyKey)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        let (resolver, _events) = resolver(&api);
        let k = key("a");

        let (first, second) = tokio::join!(resolver.ensure_thumbnail(&k), resolver.ensure_thumbnail(&k));

        assert!(matches!(first, ThumbnailOutcome::Ready(_)));
        assert_eq!(second, ThumbnailOutcome::InFlight);
        assert_eq!(api.thumbnail_calls(&k), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("a", [Reply::Status(500)]);
        let (resolver, mut events) = resolver(&api);

        assert_eq!(resolver.ensure_thumbnail(&key("a")).await, ThumbnailOutcome::Failed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.thumbnail_calls(&key("a")), 1);
        assert_eq!(api.generation_calls(&key("a")), 0);
        assert_eq!(resolver.retry_attempts(&key("a")), 0);
        assert!(resolver.snapshot().is_empty());
        assert!(matches!(
            events.poll().as_slice(),
            [MediaEvent::ThumbnailFailed { .. }]
        ));

        // Not stalled: a manual request tries again
        assert!(matches!(
            resolver.ensure_thumbnail(&key("a")).await,
            ThumbnailOutcome::Ready(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_requests_generation_and_retries() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("a", [Reply::NotFound]);
        let (resolver, mut events) = resolver(&api);

        let outcome = resolver.ensure_thumbnail(&key("a")).await;
        assert_eq!(
            outcome,
            ThumbnailOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert!(resolver.snapshot().is_empty());

        // Retry pending: further requests are no-ops
        assert_eq!(resolver.ensure_thumbnail(&key("a")).await, ThumbnailOutcome::InFlight);

        settle(&mut events, &key("a")).await;
        assert!(resolver.thumbnail(&key("a")).is_some());
        assert_eq!(api.thumbnail_calls(&key("a")), 2);
        assert_eq!(api.generation_calls(&key("a")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_doubles_and_stops_after_four() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("a", [Reply::NotFound; 10]);
        let (resolver, mut events) = resolver(&api);
        let started = tokio::time::Instant::now();

        resolver.ensure_thumbnail(&key("a")).await;
        let seen = settle(&mut events, &key("a")).await;

        assert_eq!(
            retry_delays(&seen),
            [2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert!(matches!(
            seen.last(),
            Some(MediaEvent::ThumbnailStalled { attempts: 4, .. })
        ));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(api.thumbnail_calls(&key("a")), 5);
        assert_eq!(api.generation_calls(&key("a")), 1);
        assert!(resolver.is_stalled(&key("a")));

        // Stalled keys stay put
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(resolver.ensure_thumbnail(&key("a")).await, ThumbnailOutcome::Stalled);
        assert_eq!(api.thumbnail_calls(&key("a")), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_misses_then_success() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("x", [Reply::NotFound, Reply::NotFound, Reply::NotFound, Reply::Ok]);
        let (resolver, mut events) = resolver(&api);

        resolver.ensure_thumbnail(&key("x")).await;
        let seen = settle(&mut events, &key("x")).await;

        assert_eq!(
            retry_delays(&seen),
            [2, 4, 8].map(Duration::from_secs).to_vec()
        );
        assert!(resolver.snapshot().contains_key(&key("x")));
        assert_eq!(api.thumbnail_calls(&key("x")), 4);
        assert_eq!(api.generation_calls(&key("x")), 1);
        assert_eq!(resolver.retry_attempts(&key("x")), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.thumbnail_calls(&key("x")), 4);
        assert!(events.poll().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_does_not_block_retry() {
        let api = FakeMediaApi::new();
        api.fail_generation();
        api.script_thumbnail("a", [Reply::NotFound]);
        let (resolver, mut events) = resolver(&api);

        assert!(matches!(
            resolver.ensure_thumbnail(&key("a")).await,
            ThumbnailOutcome::Retrying { attempt: 1, .. }
        ));
        settle(&mut events, &key("a")).await;

        assert!(resolver.thumbnail(&key("a")).is_some());
        assert_eq!(api.generation_calls(&key("a")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_revokes_and_refetches() {
        let api = FakeMediaApi::new();
        let (resolver, _events) = resolver(&api);

        let ThumbnailOutcome::Ready(old) = resolver.ensure_thumbnail(&key("a")).await else {
            panic!("expected ready");
        };

        resolver.release(&key("a"));
        assert!(!resolver.handles().is_live(&old));
        assert!(resolver.thumbnail(&key("a")).is_none());
        assert_eq!(resolver.handles().revoked_count(), 1);

        // Releasing again revokes nothing
        resolver.release(&key("a"));
        assert_eq!(resolver.handles().revoked_count(), 1);

        let ThumbnailOutcome::Ready(new) = resolver.ensure_thumbnail(&key("a")).await else {
            panic!("expected ready");
        };
        assert_ne!(old, new);
        assert_eq!(api.thumbnail_calls(&key("a")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_cancels_pending_retry() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("a", [Reply::NotFound]);
        let (resolver, _events) = resolver(&api);

        assert!(matches!(
            resolver.ensure_thumbnail(&key("a")).await,
            ThumbnailOutcome::Retrying { .. }
        ));
        resolver.release(&key("a"));
        assert_eq!(resolver.retry_attempts(&key("a")), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.thumbnail_calls(&key("a")), 1);

        // Fresh state: the next 404 would ask for generation again
        api.script_thumbnail("a", [Reply::NotFound]);
        resolver.ensure_thumbnail(&key("a")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.generation_calls(&key("a")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_during_fetch_discards_result() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        let (resolver, _events) = resolver(&api);

        let task = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.ensure_thumbnail(&key("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        resolver.release(&key("a"));

        assert_eq!(task.await.unwrap(), ThumbnailOutcome::Skipped);
        assert!(resolver.snapshot().is_empty());
        assert_eq!(resolver.handles().live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_all_is_idempotent() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("c", [Reply::NotFound]);
        let (resolver, _events) = resolver(&api);

        resolver.ensure_thumbnail(&key("a")).await;
        resolver.ensure_thumbnail(&key("b")).await;
        resolver.ensure_full_image(&key("a")).await.unwrap();
        resolver.ensure_thumbnail(&key("c")).await;
        assert_eq!(resolver.handles().live_count(), 3);

        resolver.release_all();
        assert_eq!(resolver.handles().live_count(), 0);
        assert_eq!(resolver.handles().revoked_count(), 3);
        assert!(!resolver.is_alive());

        resolver.release_all();
        assert_eq!(resolver.handles().revoked_count(), 3);

        // The pending retry for "c" never fires
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.thumbnail_calls(&key("c")), 1);

        assert_eq!(resolver.ensure_thumbnail(&key("d")).await, ThumbnailOutcome::Skipped);
        assert!(matches!(
            resolver.ensure_full_image(&key("d")).await,
            Err(MediaError::ScopeClosed)
        ));
        assert_eq!(api.total_thumbnail_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_all_during_fetch_leaks_nothing() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        let (resolver, _events) = resolver(&api);

        let thumb = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.ensure_thumbnail(&key("a")).await })
        };
        let full = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.ensure_full_image(&key("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        resolver.release_all();

        assert_eq!(thumb.await.unwrap(), ThumbnailOutcome::Skipped);
        assert!(matches!(full.await.unwrap(), Err(MediaError::ScopeClosed)));
        assert_eq!(resolver.handles().live_count(), 0);
        assert_eq!(resolver.handles().created_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_thumbnail_request_frees_key() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        let (resolver, _events) = resolver(&api);
        let k = key("a");

        let timed_out = tokio::time::timeout(Duration::from_millis(10), resolver.ensure_thumbnail(&k)).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(matches!(
            resolver.ensure_thumbnail(&k).await,
            ThumbnailOutcome::Ready(_)
        ));
        assert_eq!(api.thumbnail_calls(&k), 2);
        assert_eq!(resolver.handles().live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_full_image_leader_wakes_waiters() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        let (resolver, _events) = resolver(&api);

        let leader = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.ensure_full_image(&key("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiter = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.ensure_full_image(&key("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let waited = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
        assert!(matches!(waited, Err(MediaError::Unresolved { .. })));

        // The key is free again
        assert!(resolver.ensure_full_image(&key("a")).await.is_ok());
        assert_eq!(api.full_calls(&key("a")), 2);
        assert_eq!(resolver.handles().live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retry_ends_the_cycle() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("a", [Reply::NotFound, Reply::Status(500), Reply::NotFound]);
        let (resolver, mut events) = resolver(&api);

        assert!(matches!(
            resolver.ensure_thumbnail(&key("a")).await,
            ThumbnailOutcome::Retrying { attempt: 1, .. }
        ));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(api.thumbnail_calls(&key("a")), 2);
        assert_eq!(resolver.retry_attempts(&key("a")), 0);
        assert!(matches!(
            events.poll().last(),
            Some(MediaEvent::ThumbnailFailed { .. })
        ));

        // A manual request that hits 404 starts a fresh cycle
        assert_eq!(
            resolver.ensure_thumbnail(&key("a")).await,
            ThumbnailOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        resolver.release_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_batch_runs_sequential_waves() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(50));
        let (resolver, _events) = resolver(&api);
        let keys: Vec<ImageKey> = (0..10).map(|i| key(&format!("k{i}"))).collect();

        let summary = resolver.load_batch(&keys).await;

        assert_eq!(summary.waves, 3);
        assert_eq!(summary.requested, 10);
        assert_eq!(summary.ready, 10);
        assert_eq!(api.max_concurrent(), 4);

        // Every fetch of a wave starts only after the previous wave settled
        let completed_before: Vec<usize> = api.fetch_log().iter().map(|r| r.completed_before).collect();
        assert_eq!(completed_before, vec![0, 0, 0, 0, 4, 4, 4, 4, 8, 8]);
        let order: Vec<ImageKey> = api.fetch_log().into_iter().map(|r| r.key).collect();
        assert_eq!(order, keys);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_batch_skips_missing_keys() {
        let api = FakeMediaApi::new();
        let (resolver, _events) = resolver(&api);
        let entities = vec![Some(key("a")), Some(key("b")), None, Some(key(""))];

        let summary = resolver.load_batch(&entities).await;

        assert_eq!(api.total_thumbnail_calls(), 2);
        assert_eq!(summary.requested, 2);
        assert_eq!(summary.waves, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_batch_skips_cached_and_duplicate_keys() {
        let api = FakeMediaApi::new();
        let (resolver, _events) = resolver(&api);
        resolver.ensure_thumbnail(&key("a")).await;

        let summary = resolver
            .load_batch(&[key("a"), key("b"), key("a"), key("b")])
            .await;

        assert_eq!(summary.requested, 1);
        assert_eq!(api.thumbnail_calls(&key("a")), 1);
        assert_eq!(api.thumbnail_calls(&key("b")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_batch_reports_outcomes() {
        let api = FakeMediaApi::new();
        api.script_thumbnail("b", [Reply::NotFound]);
        api.script_thumbnail("c", [Reply::Status(503)]);
        let (resolver, _events) = resolver(&api);

        let summary = resolver.load_batch(&[key("a"), key("b"), key("c")]).await;

        assert_eq!(summary.ready, 1);
        assert_eq!(summary.retrying, 1);
        assert_eq!(summary.failed, 1);
        resolver.release_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_image_shared_fetch() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        let (resolver, mut events) = resolver(&api);
        let k = key("a");

        let (first, second) = tokio::join!(resolver.ensure_full_image(&k), resolver.ensure_full_image(&k));

        let first = first.unwrap();
        assert_eq!(second.unwrap(), first);
        assert_eq!(api.full_calls(&k), 1);
        assert_eq!(
            resolver.handles().resolve(&first).as_deref(),
            Some(&b"full:a"[..])
        );
        // Separate from the thumbnail cache
        assert!(resolver.snapshot().is_empty());
        assert_eq!(resolver.full_image_snapshot().len(), 1);
        assert_eq!(events.poll(), vec![MediaEvent::FullImageReady { key: k }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_image_failure_is_returned() {
        let api = FakeMediaApi::new();
        api.script_full("a", [Reply::NotFound, Reply::Status(500)]);
        let (resolver, _events) = resolver(&api);

        let err = resolver.ensure_full_image(&key("a")).await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound { .. }));
        assert!(!err.is_retryable());

        let err = resolver.ensure_full_image(&key("a")).await.unwrap_err();
        assert!(matches!(err, MediaError::Api { .. }));
        assert!(err.is_retryable());

        // No generation request, no background retry
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.full_calls(&key("a")), 2);
        assert_eq!(api.generation_calls(&key("a")), 0);

        assert!(resolver.ensure_full_image(&key("a")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_image_waiter_sees_leader_failure() {
        let api = FakeMediaApi::with_latency(Duration::from_millis(100));
        api.script_full("a", [Reply::Status(500)]);
        let (resolver, _events) = resolver(&api);
        let k = key("a");

        let (first, second) = tokio::join!(resolver.ensure_full_image(&k), resolver.ensure_full_image(&k));

        assert!(matches!(first, Err(MediaError::Api { .. })));
        assert!(matches!(second, Err(MediaError::Unresolved { .. })));
        assert_eq!(api.full_calls(&k), 1);
    }
}
