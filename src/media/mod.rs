//! Image resolution and caching.
//!
//! Turns image keys into [`LocalHandle`]s the views can render, keeping at
//! most one fetch per key in flight and never leaking a handle. See
//! [`MediaResolver`] for the lifecycle.

mod cache;
mod error;
mod events;
mod handle;
mod resolver;
mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::MediaCache;
pub use error::MediaError;
pub use events::{MediaEvent, MediaEvents};
pub use handle::{HandleStore, LocalHandle};
pub use resolver::{BatchSummary, MediaResolver, ThumbnailOutcome};
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy};
