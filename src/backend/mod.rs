//! Capability interface onto the log-aggregation service.
//!
//! The shipper only needs four calls: create the group, create the stream,
//! read the stream's upload sequence token, and put a batch of events.

pub mod cloudwatch;
pub mod memory;

use crate::shipper::batch::LogEvent;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use cloudwatch::CloudWatchBackend;
pub use memory::MemoryBackend;

/// Opaque token naming the position of the next accepted write on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceToken(String);

impl SequenceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(group, stream)` destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub group: String,
    pub stream: String,
}

impl StreamId {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// The write was rejected because the token was stale, or the batch was
    /// already accepted under another token.
    #[error("sequence token conflict (expected {})", .expected.as_ref().map(|t| t.as_str()).unwrap_or("none"))]
    TokenConflict { expected: Option<SequenceToken> },

    #[error("backend call timed out: {0}")]
    Timeout(String),

    #[error("backend error: {0}")]
    Service(String),
}

impl BackendError {
    pub fn is_token_conflict(&self) -> bool {
        matches!(self, BackendError::TokenConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Create the log group. Returns `AlreadyExists` when it is already there.
    async fn create_log_group(&self, group: &str) -> Result<()>;

    /// Create the log stream. Returns `AlreadyExists` when it is already there.
    async fn create_log_stream(&self, stream: &StreamId) -> Result<()>;

    /// The stream's expected next token, or `None` if nothing was written yet.
    async fn current_token(&self, stream: &StreamId) -> Result<Option<SequenceToken>>;

    /// Put events, sorted by timestamp. The token is omitted when `None`.
    async fn put_events(
        &self,
        stream: &StreamId,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>>;
}
