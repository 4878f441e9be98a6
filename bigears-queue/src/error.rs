//! Error types for publishing.

use std::sync::Arc;

use thiserror::Error;

/// A queue or store handle failed to resolve.
///
/// Cloneable because one resolution outcome is shared by every publish call.
#[derive(Debug, Clone, Error)]
#[error("{handle} handle failed to resolve: {cause:#}")]
pub struct ResolveError {
    /// Which handle failed (`"queue"` or `"store"`)
    pub handle: &'static str,
    pub cause: Arc<anyhow::Error>,
}

impl ResolveError {
    pub fn new(handle: &'static str, cause: anyhow::Error) -> Self {
        Self {
            handle,
            cause: Arc::new(cause),
        }
    }
}

/// Failure of a single publish call.
///
/// Collaborator errors pass through untouched; `Queue` and `Store` only
/// record which step of the sequence produced them.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(anyhow::Error),

    #[error(transparent)]
    Store(anyhow::Error),
}

impl PublishError {
    /// The collaborator error behind a queue or store failure.
    pub fn collaborator(&self) -> Option<&anyhow::Error> {
        match self {
            PublishError::Queue(e) | PublishError::Store(e) => Some(e),
            _ => None,
        }
    }
}
