use super::{BackendError, LogBackend, Result, SequenceToken, StreamId};
use crate::shipper::batch::LogEvent;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-process backend with CloudWatch's sequence-token rules.
///
/// Every accepted put hands out a fresh token and only that token is accepted
/// next. Failures can be queued with [`MemoryBackend::fail_next_put`] and a
/// concurrent writer can be simulated with [`MemoryBackend::advance_token`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    groups: HashMap<String, HashMap<String, StreamState>>,
    injected_put_failures: VecDeque<BackendError>,
    next_token: u64,
    put_attempts: usize,
    token_queries: usize,
}

#[derive(Debug, Default)]
struct StreamState {
    token: Option<SequenceToken>,
    batches: Vec<Vec<LogEvent>>,
}

impl State {
    fn mint_token(&mut self) -> SequenceToken {
        self.next_token += 1;
        SequenceToken::new(format!("{:020}", self.next_token))
    }

    fn stream_mut(&mut self, stream: &StreamId) -> Result<&mut StreamState> {
        self.groups
            .get_mut(&stream.group)
            .ok_or_else(|| BackendError::Service(format!("log group {} does not exist", stream.group)))?
            .get_mut(&stream.stream)
            .ok_or_else(|| BackendError::Service(format!("log stream {} does not exist", stream)))
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with `stream` already provisioned.
    pub fn with_stream(stream: &StreamId) -> Self {
        let backend = Self::new();
        backend
            .state()
            .groups
            .entry(stream.group.clone())
            .or_default()
            .insert(stream.stream.clone(), StreamState::default());
        backend
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next put fail with `error` before any token check.
    pub fn fail_next_put(&self, error: BackendError) {
        self.state().injected_put_failures.push_back(error);
    }

    /// Simulate another writer: move the stream's token forward so the
    /// shipper's carried token goes stale.
    pub fn advance_token(&self, stream: &StreamId) -> Result<SequenceToken> {
        let mut state = self.state();
        let token = state.mint_token();
        state.stream_mut(stream)?.token = Some(token.clone());
        Ok(token)
    }

    /// Accepted batches for `stream`, in acceptance order.
    pub fn batches(&self, stream: &StreamId) -> Vec<Vec<LogEvent>> {
        self.state()
            .groups
            .get(&stream.group)
            .and_then(|g| g.get(&stream.stream))
            .map(|s| s.batches.clone())
            .unwrap_or_default()
    }

    /// Messages of all accepted events for `stream`, flattened.
    pub fn messages(&self, stream: &StreamId) -> Vec<String> {
        self.batches(stream)
            .into_iter()
            .flatten()
            .map(|event| event.message)
            .collect()
    }

    pub fn has_stream(&self, stream: &StreamId) -> bool {
        self.state()
            .groups
            .get(&stream.group)
            .is_some_and(|g| g.contains_key(&stream.stream))
    }

    pub fn put_attempts(&self) -> usize {
        self.state().put_attempts
    }

    pub fn token_queries(&self) -> usize {
        self.state().token_queries
    }
}

#[async_trait]
impl LogBackend for MemoryBackend {
    async fn create_log_group(&self, group: &str) -> Result<()> {
        let mut state = self.state();
        if state.groups.contains_key(group) {
            return Err(BackendError::AlreadyExists(group.to_string()));
        }
        state.groups.insert(group.to_string(), HashMap::new());
        Ok(())
    }

    async fn create_log_stream(&self, stream: &StreamId) -> Result<()> {
        let mut state = self.state();
        let group = state.groups.get_mut(&stream.group).ok_or_else(|| {
            BackendError::Service(format!("log group {} does not exist", stream.group))
        })?;
        if group.contains_key(&stream.stream) {
            return Err(BackendError::AlreadyExists(stream.to_string()));
        }
        group.insert(stream.stream.clone(), StreamState::default());
        Ok(())
    }

    async fn current_token(&self, stream: &StreamId) -> Result<Option<SequenceToken>> {
        let mut state = self.state();
        state.token_queries += 1;
        let group = state.groups.get(&stream.group).ok_or_else(|| {
            BackendError::Service(format!("log group {} does not exist", stream.group))
        })?;
        Ok(group.get(&stream.stream).and_then(|s| s.token.clone()))
    }

    async fn put_events(
        &self,
        stream: &StreamId,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>> {
        let mut state = self.state();
        state.put_attempts += 1;

        if let Some(error) = state.injected_put_failures.pop_front() {
            return Err(error);
        }
        if events.is_empty() {
            return Err(BackendError::Service("log events must not be empty".to_string()));
        }
        if events.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
            return Err(BackendError::Service(
                "log events must be in chronological order".to_string(),
            ));
        }

        let expected = state.stream_mut(stream)?.token.clone();
        if expected.as_ref() != token {
            return Err(BackendError::TokenConflict { expected });
        }

        let next = state.mint_token();
        let target = state.stream_mut(stream)?;
        target.batches.push(events.to_vec());
        target.token = Some(next.clone());
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: i64, message: &str) -> LogEvent {
        LogEvent::new(ts, message)
    }

    #[tokio::test]
    async fn test_create_reports_already_exists() {
        let backend = MemoryBackend::new();
        let stream = StreamId::new("app", "web-1");

        backend.create_log_group("app").await.unwrap();
        assert!(matches!(
            backend.create_log_group("app").await,
            Err(BackendError::AlreadyExists(_))
        ));

        backend.create_log_stream(&stream).await.unwrap();
        assert!(matches!(
            backend.create_log_stream(&stream).await,
            Err(BackendError::AlreadyExists(_))
        ));
        assert!(backend.has_stream(&stream));
    }

    #[tokio::test]
    async fn test_stream_requires_group() {
        let backend = MemoryBackend::new();
        let result = backend.create_log_stream(&StreamId::new("nope", "s")).await;
        assert!(matches!(result, Err(BackendError::Service(_))));
    }

    #[tokio::test]
    async fn test_put_enforces_token_chain() {
        let stream = StreamId::new("app", "web-1");
        let backend = MemoryBackend::with_stream(&stream);

        assert!(backend.current_token(&stream).await.unwrap().is_none());

        let t1 = backend
            .put_events(&stream, &[event(1, "a")], None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.current_token(&stream).await.unwrap(), Some(t1.clone()));

        // Reusing the first-write form after a write is a conflict.
        match backend.put_events(&stream, &[event(2, "b")], None).await {
            Err(BackendError::TokenConflict { expected }) => assert_eq!(expected, Some(t1.clone())),
            other => panic!("expected conflict, got {:?}", other),
        }

        let t2 = backend
            .put_events(&stream, &[event(2, "b")], Some(&t1))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(t1, t2);
        assert_eq!(backend.messages(&stream), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_put_rejects_empty_and_unsorted() {
        let stream = StreamId::new("app", "web-1");
        let backend = MemoryBackend::with_stream(&stream);

        assert!(backend.put_events(&stream, &[], None).await.is_err());
        assert!(backend
            .put_events(&stream, &[event(5, "late"), event(1, "early")], None)
            .await
            .is_err());
        assert!(backend.batches(&stream).is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let stream = StreamId::new("app", "web-1");
        let backend = MemoryBackend::with_stream(&stream);
        backend.fail_next_put(BackendError::Service("throttled".to_string()));

        assert!(backend.put_events(&stream, &[event(1, "a")], None).await.is_err());
        assert!(backend.put_events(&stream, &[event(1, "a")], None).await.is_ok());
        assert_eq!(backend.put_attempts(), 2);
    }
}
