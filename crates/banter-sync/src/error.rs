use thiserror::Error;

use banter_store::{StoreError, UploadError};

use crate::send::Draft;

/// Failures surfaced to callers of the command surface. Everything else
/// (feed drops, hydration misses, malformed events) is absorbed inside the
/// engine.
#[derive(Debug, Error)]
pub enum SendError {
    /// The image upload failed; no message write was attempted.
    #[error("image upload failed: {0}")]
    UploadFailed(#[source] UploadError),
    #[error("write failed: {0}")]
    WriteFailed(#[source] StoreError),
    /// Neither text nor an image — rejected before touching the store.
    #[error("nothing to send")]
    EmptyDraft,
    /// The session was closed (project switch or teardown).
    #[error("session closed")]
    Closed,
}

/// A failed send, carrying the draft back so the caller can offer a retry
/// without retyping.
#[derive(Debug)]
pub struct SendFailure {
    pub draft: Draft,
    pub error: SendError,
}
