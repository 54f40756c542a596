pub mod batch;
pub mod batcher;
pub mod flusher;

use crate::backend::{LogBackend, StreamId};
use crate::config::Config;
use crate::source::tailer::Tailer;
use std::sync::Arc;
use tracing::info;

pub use batch::{Batch, BatchLimits, LogEvent};
pub use batcher::{Batcher, BatcherState, FlushReason, ShipError, ShipperStats};
pub use flusher::{FlushError, Flusher};

/// Provision the stream, load its token, then tail `config.source.path` from
/// its current end until the sentinel line is read.
pub async fn ship(config: &Config, backend: Arc<dyn LogBackend>) -> Result<ShipperStats, ShipError> {
    let stream = StreamId::new(
        config.destination.log_group.clone(),
        config.destination.log_stream.clone(),
    );

    let mut flusher = Flusher::new(backend, stream);
    flusher.ensure_stream().await?;
    flusher.init_token().await?;

    let tailer = Tailer::open(&config.source.path, config.source.sentinel.clone())?;
    info!(
        path = %tailer.path().display(),
        stream = %flusher.stream(),
        max_events = config.batch.max_events,
        max_bytes = config.batch.max_bytes,
        "shipping started"
    );

    Batcher::new(tailer, flusher, &config.batch).run().await
}
