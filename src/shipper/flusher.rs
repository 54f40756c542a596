use crate::backend::{BackendError, LogBackend, SequenceToken, StreamId};
use crate::shipper::batch::LogEvent;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("write failed again after refreshing the sequence token: {0}")]
    RetryExhausted(BackendError),
}

/// Writes batches to one stream and carries its sequence token between writes.
pub struct Flusher {
    backend: Arc<dyn LogBackend>,
    stream: StreamId,
    token: Option<SequenceToken>,
    token_refreshes: u64,
}

impl Flusher {
    pub fn new(backend: Arc<dyn LogBackend>, stream: StreamId) -> Self {
        Self {
            backend,
            stream,
            token: None,
            token_refreshes: 0,
        }
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// The token the next write will carry.
    pub fn token(&self) -> Option<&SequenceToken> {
        self.token.as_ref()
    }

    pub fn token_refreshes(&self) -> u64 {
        self.token_refreshes
    }

    /// Create the log group and stream unless they already exist.
    pub async fn ensure_stream(&self) -> Result<(), FlushError> {
        match self.backend.create_log_group(&self.stream.group).await {
            Ok(()) => info!(group = %self.stream.group, "created log group"),
            Err(BackendError::AlreadyExists(_)) => {
                debug!(group = %self.stream.group, "log group already exists")
            }
            Err(err) => return Err(err.into()),
        }

        match self.backend.create_log_stream(&self.stream).await {
            Ok(()) => info!(stream = %self.stream, "created log stream"),
            Err(BackendError::AlreadyExists(_)) => {
                debug!(stream = %self.stream, "log stream already exists")
            }
            Err(err) => return Err(err.into()),
        }

        Ok(())
    }

    /// Ask the backend for the stream's expected next token.
    pub async fn current_token(&self) -> Result<Option<SequenceToken>, FlushError> {
        Ok(self.backend.current_token(&self.stream).await?)
    }

    /// Load the starting token from backend state.
    pub async fn init_token(&mut self) -> Result<(), FlushError> {
        self.token = self.current_token().await?;
        info!(stream = %self.stream, token = ?self.token, "loaded sequence token");
        Ok(())
    }

    /// Put `events` (already sorted) with the carried token.
    ///
    /// A token conflict refreshes the token and retries exactly once; any other
    /// failure, or a failure of the retry, is returned as is.
    pub async fn write(&mut self, events: &[LogEvent]) -> Result<Option<&SequenceToken>, FlushError> {
        if events.is_empty() {
            return Ok(self.token.as_ref());
        }

        match self.put(events).await {
            Ok(next) => {
                self.token = next;
                return Ok(self.token.as_ref());
            }
            Err(err) if err.is_token_conflict() => {
                warn!(
                    stream = %self.stream,
                    error = %err,
                    "sequence token conflict; refreshing token and retrying once"
                );
            }
            Err(err) => return Err(err.into()),
        }

        self.token = self.current_token().await?;
        self.token_refreshes += 1;

        match self.put(events).await {
            Ok(next) => {
                self.token = next;
                Ok(self.token.as_ref())
            }
            Err(err) => Err(FlushError::RetryExhausted(err)),
        }
    }

    async fn put(&self, events: &[LogEvent]) -> Result<Option<SequenceToken>, BackendError> {
        self.backend
            .put_events(&self.stream, events, self.token.as_ref())
            .await
    }
}
