//! Advent calendar view-model
//!
//! Owns one media scope: thumbnails are loaded after each listing and every
//! handle is released when the board is closed or dropped.

use crate::api::{AdventApi, ApiError, MediaApi};
use crate::config::MediaConfig;
use crate::media::{BatchSummary, LocalHandle, MediaError, MediaEvent, MediaEvents, MediaResolver};
use crate::models::{ADVENT_DAYS, AdventEntry, AdventView, HasImageKey};

/// Advent entries for one side of the calendar, with their thumbnails
#[derive(Debug)]
pub struct AdventBoard<A> {
    view: AdventView,
    media: MediaResolver<A>,
    events: MediaEvents,
    entries: Vec<AdventEntry>,
    load_error: Option<String>,
}

impl<A: MediaApi + AdventApi> AdventBoard<A> {
    /// Create a board; nothing is fetched until [`AdventBoard::load`].
    pub fn new(api: A, view: AdventView, config: &MediaConfig) -> Self {
        let (media, events) = MediaResolver::new(api, config);
        Self {
            view,
            media,
            events,
            entries: Vec::new(),
            load_error: None,
        }
    }

    /// Fetch the entries, then their thumbnails.
    pub async fn load(&mut self) -> Result<BatchSummary, ApiError> {
        let mut entries = match self.media.api().advents(self.view).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to load advents: {e}");
                self.load_error = Some(e.to_string());
                return Err(e);
            }
        };

        if !self.media.is_alive() {
            return Ok(BatchSummary::default());
        }

        entries.retain(|entry| {
            let valid = entry.has_valid_day();
            if !valid {
                tracing::warn!("Skipping advent entry {} on invalid day {}", entry.id, entry.day);
            }
            valid
        });
        entries.sort_by(|a, b| a.day.cmp(&b.day).then(a.created_at.cmp(&b.created_at)));
        self.entries = entries;
        self.load_error = None;

        Ok(self.media.load_batch(&self.entries).await)
    }

    /// Side of the calendar shown
    pub const fn view(&self) -> AdventView {
        self.view
    }

    /// Loaded entries, by day
    pub fn entries(&self) -> &[AdventEntry] {
        &self.entries
    }

    /// Error from the last failed load
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Entries behind one door
    pub fn entries_for_day(&self, day: u8) -> Vec<&AdventEntry> {
        self.entries.iter().filter(|entry| entry.day == day).collect()
    }

    /// Number of days with at least one entry
    pub fn filled_days(&self) -> usize {
        ADVENT_DAYS
            .filter(|day| self.entries.iter().any(|entry| entry.day == *day))
            .count()
    }

    /// Cached thumbnail for an entry (None renders a placeholder)
    pub fn thumbnail(&self, entry: &AdventEntry) -> Option<LocalHandle> {
        entry.image_key().and_then(|key| self.media.thumbnail(key))
    }

    /// The board's media resolver
    pub const fn media(&self) -> &MediaResolver<A> {
        &self.media
    }

    /// Media changes since the last call
    pub fn poll_events(&mut self) -> Vec<MediaEvent> {
        self.events.poll()
    }

    /// Event stream of the board's media scope
    pub const fn events_mut(&mut self) -> &mut MediaEvents {
        &mut self.events
    }

    /// Open an entry in full resolution. `Ok(None)` if it has no image.
    pub async fn open_entry(&self, entry: &AdventEntry) -> Result<Option<LocalHandle>, MediaError> {
        match entry.image_key() {
            Some(key) if !key.is_empty() => self.media.ensure_full_image(key).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Delete an entry server-side and drop its media.
    pub async fn delete_entry(&mut self, id: &str) -> Result<(), ApiError> {
        self.media.api().delete_advent(id).await?;

        let Some(index) = self.entries.iter().position(|entry| entry.id == id) else {
            return Ok(());
        };
        let entry = self.entries.remove(index);
        if let Some(key) = entry.image_key() {
            self.media.release(key);
        }
        Ok(())
    }
}

impl<A> AdventBoard<A> {
    /// Close the board, releasing every handle and discarding undelivered
    /// events. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.media.release_all();
        let dropped = self.events.poll().len();
        if dropped > 0 {
            tracing::debug!("Discarded {dropped} unread media events");
        }
    }
}

impl<A> Drop for AdventBoard<A> {
    fn drop(&mut self) {
        self.media.release_all();
    }
}
