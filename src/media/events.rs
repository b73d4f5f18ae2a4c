//! Notifications emitted by the media resolver.
//!
//! Views poll these to know when to re-render.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::ImageKey;

/// Something changed for an image key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A thumbnail is now in the cache
    ThumbnailReady {
        /// Image key
        key: ImageKey,
    },
    /// The thumbnail was not generated yet; another fetch is scheduled
    RetryScheduled {
        /// Image key
        key: ImageKey,
        /// Retry number (1-based)
        attempt: u32,
        /// Delay before the retry fires
        delay: Duration,
    },
    /// Retries are exhausted; the thumbnail stays unresolved
    ThumbnailStalled {
        /// Image key
        key: ImageKey,
        /// Retries that were made
        attempts: u32,
    },
    /// The thumbnail fetch failed for a reason other than "not generated yet"
    ThumbnailFailed {
        /// Image key
        key: ImageKey,
        /// Error description
        error: String,
    },
    /// A full-resolution image is now in the cache
    FullImageReady {
        /// Image key
        key: ImageKey,
    },
}

impl MediaEvent {
    /// Key the event is about
    pub const fn key(&self) -> &ImageKey {
        match self {
            Self::ThumbnailReady { key }
            | Self::RetryScheduled { key, .. }
            | Self::ThumbnailStalled { key, .. }
            | Self::ThumbnailFailed { key, .. }
            | Self::FullImageReady { key } => key,
        }
    }
}

/// Receiving side of the resolver's event channel.
///
/// The channel is unbounded: events queue up until they are polled or the
/// receiver is dropped, so long-lived owners should drain it regularly.
#[derive(Debug)]
pub struct MediaEvents {
    rx: mpsc::UnboundedReceiver<MediaEvent>,
}

impl MediaEvents {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<MediaEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Drain pending events (non-blocking).
    pub fn poll(&mut self) -> Vec<MediaEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<MediaEvent> {
        self.rx.recv().await
    }
}
