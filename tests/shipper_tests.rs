/// End-to-end tests for the shipper
///
/// A real file is tailed while lines are appended to it, and the batches that
/// reach an in-memory backend are checked.

mod common;

use common::{append, fast_batch_config, test_config, HookedSource, GROUP, STREAM};
use cwtail::backend::{BackendError, LogBackend, MemoryBackend, StreamId};
use cwtail::shipper::{ship, Batcher, FlushError, Flusher, ShipError, ShipperStats};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamId {
        StreamId::new(GROUP, STREAM)
    }

    /// Helper: start shipping `path` and give the tailer time to open it
    async fn start(
        path: &Path,
        backend: Arc<MemoryBackend>,
    ) -> JoinHandle<Result<ShipperStats, ShipError>> {
        let config = test_config(path.to_path_buf());
        let handle = tokio::spawn(async move {
            let backend: Arc<dyn LogBackend> = backend;
            ship(&config, backend).await
        });
        sleep(Duration::from_millis(50)).await;
        handle
    }

    async fn finish(
        handle: JoinHandle<Result<ShipperStats, ShipError>>,
    ) -> Result<ShipperStats, ShipError> {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("shipper did not stop")
            .expect("shipper task panicked")
    }

    #[tokio::test]
    async fn test_ships_appended_lines_until_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old 1\nold 2\n").unwrap();

        let backend = Arc::new(MemoryBackend::with_stream(&stream()));
        let handle = start(&path, backend.clone()).await;

        append(&path, "first\nsecond\n__CW_STOP__\nafter stop\n");
        let stats = finish(handle).await.unwrap();

        assert_eq!(backend.messages(&stream()), vec!["first\n", "second\n"]);
        assert_eq!(stats.lines_read, 2);
        assert_eq!(stats.events_shipped, 2);
    }

    #[tokio::test]
    async fn test_provisions_missing_group_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let handle = start(&path, backend.clone()).await;

        append(&path, "hello\n__CW_STOP__\n");
        finish(handle).await.unwrap();

        assert!(backend.has_stream(&stream()));
        assert_eq!(backend.messages(&stream()), vec!["hello\n"]);
    }

    #[tokio::test]
    async fn test_resumes_token_of_existing_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let backend = Arc::new(MemoryBackend::with_stream(&stream()));
        backend.advance_token(&stream()).unwrap();

        let handle = start(&path, backend.clone()).await;
        append(&path, "resumed\n__CW_STOP__\n");
        let stats = finish(handle).await.unwrap();

        assert_eq!(backend.messages(&stream()), vec!["resumed\n"]);
        assert_eq!(stats.token_refreshes, 0);
        assert_eq!(backend.put_attempts(), 1);
    }

    #[tokio::test]
    async fn test_idle_flush_happens_before_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let backend = Arc::new(MemoryBackend::with_stream(&stream()));
        let handle = start(&path, backend.clone()).await;

        append(&path, "quiet\n");
        sleep(Duration::from_millis(400)).await;
        assert_eq!(backend.batches(&stream()).len(), 1);

        append(&path, "__CW_STOP__\n");
        let stats = finish(handle).await.unwrap();
        assert_eq!(stats.interval_flushes, 1);
        assert_eq!(stats.shutdown_flushes, 0);
    }

    #[tokio::test]
    async fn test_stale_token_is_refreshed_and_retried() {
        let backend = Arc::new(MemoryBackend::with_stream(&stream()));
        let rival = backend.clone();

        // The first batch goes out on the idle interval, then another writer
        // moves the token before the drain flush.
        let source = HookedSource::new()
            .line("a\n")
            .idle(30)
            .call(move || {
                rival.advance_token(&StreamId::new(GROUP, STREAM)).unwrap();
            })
            .line("b\n");

        let mut flusher = Flusher::new(backend.clone(), stream());
        flusher.init_token().await.unwrap();
        let mut batcher = Batcher::new(source, flusher, &fast_batch_config());
        let stats = batcher.run().await.unwrap();

        assert_eq!(backend.messages(&stream()), vec!["a\n", "b\n"]);
        assert_eq!(stats.token_refreshes, 1);
        assert_eq!(backend.put_attempts(), 3);
        assert_eq!(
            batcher.flusher().token().cloned(),
            backend.current_token(&stream()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_fatal_backend_error_stops_shipper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let backend = Arc::new(MemoryBackend::with_stream(&stream()));
        backend.fail_next_put(BackendError::Service("access denied".to_string()));

        let handle = start(&path, backend.clone()).await;
        append(&path, "lost\n__CW_STOP__\n");
        let result = finish(handle).await;

        assert!(matches!(
            result,
            Err(ShipError::Flush(FlushError::Backend(BackendError::Service(_))))
        ));
        assert!(backend.batches(&stream()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_file_fails_after_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let config = test_config(dir.path().join("missing.log"));

        let result = ship(&config, backend.clone()).await;

        assert!(matches!(result, Err(ShipError::Tailer(_))));
        assert!(backend.has_stream(&stream()));
    }
}
