use thiserror::Error;

/// Failure of an aggregate fetch across sources.
///
/// Single-source failures never surface here; adapters degrade them to empty
/// results. Only conditions that make the whole fetch meaningless do.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("keyword must be non-empty")]
    InvalidKeyword,
    #[error("source '{0}' is not registered")]
    UnknownSource(String),
    #[error("source '{0}' is not ready")]
    SourceNotReady(String),
    #[error("all {attempted} dispatched source fetches failed")]
    AllSourcesFailed { attempted: usize },
}
