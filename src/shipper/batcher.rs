use crate::config::BatchConfig;
use crate::shipper::batch::{truncate_to_fit, Batch, BatchLimits, LogEvent};
use crate::shipper::flusher::{FlushError, Flusher};
use crate::source::tailer::{LineSource, TailEvent, TailerError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("tailer error: {0}")]
    Tailer(#[from] TailerError),

    #[error("flush error: {0}")]
    Flush(#[from] FlushError),
}

/// Why a batch was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The batch reached the event count ceiling.
    Count,
    /// The batch reached, or the next line would exceed, the byte ceiling.
    Bytes,
    /// Input went quiet for longer than the flush interval.
    Interval,
    /// The sentinel was read; remaining events are drained.
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::Count => "count",
            FlushReason::Bytes => "bytes",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Batcher states.
///
/// ```text
/// Idle ──line──▶ Accumulating ──ceiling / interval──▶ Flushing ──▶ Idle | Accumulating
///   │                 │
///   └────── Stop ─────┴──▶ Draining ──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Buffer empty, polling for input.
    Idle,
    /// Buffer holds events below every ceiling.
    Accumulating,
    /// A flush is due.
    Flushing(FlushReason),
    /// Sentinel seen; the remaining buffer is sent before stopping.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipperStats {
    pub lines_read: u64,
    pub events_shipped: u64,
    pub bytes_shipped: u64,
    pub batches_flushed: u64,
    pub count_flushes: u64,
    pub byte_flushes: u64,
    pub interval_flushes: u64,
    pub shutdown_flushes: u64,
    pub truncated_lines: u64,
    pub token_refreshes: u64,
}

impl ShipperStats {
    fn record_flush(&mut self, reason: FlushReason, events: usize, bytes: usize) {
        self.batches_flushed += 1;
        self.events_shipped += events as u64;
        self.bytes_shipped += bytes as u64;
        match reason {
            FlushReason::Count => self.count_flushes += 1,
            FlushReason::Bytes => self.byte_flushes += 1,
            FlushReason::Interval => self.interval_flushes += 1,
            FlushReason::Shutdown => self.shutdown_flushes += 1,
        }
    }
}

/// Turns a line stream into bounded, sorted batches and decides when to flush.
pub struct Batcher<S> {
    source: S,
    flusher: Flusher,
    limits: BatchLimits,
    flush_interval: Duration,
    poll_interval: Duration,
    buffer: Batch,
    // An event that did not fit; it opens the next batch once the flush is done.
    pending: Option<LogEvent>,
    in_flight: usize,
    last_flush: Instant,
    state: BatcherState,
    stats: ShipperStats,
}

impl<S: LineSource> Batcher<S> {
    pub fn new(source: S, flusher: Flusher, config: &BatchConfig) -> Self {
        Self {
            source,
            flusher,
            limits: BatchLimits {
                max_events: config.max_events,
                max_bytes: config.max_bytes,
            },
            flush_interval: config.flush_interval,
            poll_interval: config.poll_interval,
            buffer: Batch::new(),
            pending: None,
            in_flight: 0,
            last_flush: Instant::now(),
            state: BatcherState::Idle,
            stats: ShipperStats::default(),
        }
    }

    pub fn state(&self) -> BatcherState {
        self.state
    }

    pub fn stats(&self) -> &ShipperStats {
        &self.stats
    }

    pub fn flusher(&self) -> &Flusher {
        &self.flusher
    }

    /// Run until the sentinel is read and the buffer drained.
    ///
    /// On a fatal error the events still buffered are lost; their count is
    /// logged before the error is returned.
    pub async fn run(&mut self) -> Result<ShipperStats, ShipError> {
        self.last_flush = Instant::now();

        while self.state != BatcherState::Stopped {
            if let Err(err) = self.step().await {
                let dropped =
                    self.buffer.len() + self.pending.is_some() as usize + self.in_flight;
                error!(
                    stream = %self.flusher.stream(),
                    dropped_events = dropped,
                    error = %err,
                    "shipping stopped on fatal error; buffered events were not sent"
                );
                return Err(err);
            }
        }

        self.stats.token_refreshes = self.flusher.token_refreshes();
        info!(
            stream = %self.flusher.stream(),
            lines_read = self.stats.lines_read,
            events_shipped = self.stats.events_shipped,
            batches_flushed = self.stats.batches_flushed,
            token_refreshes = self.stats.token_refreshes,
            "shipper stopped"
        );
        Ok(self.stats.clone())
    }

    /// Perform one transition.
    pub async fn step(&mut self) -> Result<(), ShipError> {
        match self.state {
            BatcherState::Stopped => {}
            BatcherState::Draining => {
                if !self.buffer.is_empty() {
                    self.flush(FlushReason::Shutdown).await?;
                }
                self.state = BatcherState::Stopped;
            }
            BatcherState::Flushing(reason) => {
                self.flush(reason).await?;
                self.state = match self.pending.take() {
                    Some(event) => self.append(event),
                    None => BatcherState::Idle,
                };
            }
            BatcherState::Idle | BatcherState::Accumulating => match self.source.poll_line()? {
                TailEvent::Line(line) => self.state = self.on_line(line),
                TailEvent::Idle => self.on_idle().await,
                TailEvent::Stop => self.state = BatcherState::Draining,
            },
        }
        Ok(())
    }

    fn on_line(&mut self, line: String) -> BatcherState {
        self.stats.lines_read += 1;
        let mut event = LogEvent::now(line);
        if event.byte_len() > self.limits.max_bytes {
            truncate_to_fit(&mut event, self.limits.max_bytes);
            self.stats.truncated_lines += 1;
        }

        if !self.buffer.is_empty() && self.buffer.would_overflow(&event, self.limits) {
            let reason = if self.buffer.len() + 1 > self.limits.max_events {
                FlushReason::Count
            } else {
                FlushReason::Bytes
            };
            self.pending = Some(event);
            return BatcherState::Flushing(reason);
        }

        self.append(event)
    }

    fn append(&mut self, event: LogEvent) -> BatcherState {
        self.buffer.push(event);
        if !self.buffer.is_full(self.limits) {
            BatcherState::Accumulating
        } else if self.buffer.len() >= self.limits.max_events {
            BatcherState::Flushing(FlushReason::Count)
        } else {
            BatcherState::Flushing(FlushReason::Bytes)
        }
    }

    async fn on_idle(&mut self) {
        if !self.buffer.is_empty() && self.last_flush.elapsed() > self.flush_interval {
            self.state = BatcherState::Flushing(FlushReason::Interval);
            return;
        }
        sleep(self.poll_interval).await;
    }

    async fn flush(&mut self, reason: FlushReason) -> Result<(), ShipError> {
        let bytes = self.buffer.bytes();
        let events = self.buffer.take_sorted();
        self.last_flush = Instant::now();
        if events.is_empty() {
            return Ok(());
        }

        self.in_flight = events.len();
        let token = self.flusher.write(&events).await?.cloned();
        debug!(
            stream = %self.flusher.stream(),
            %reason,
            events = events.len(),
            bytes,
            next_token = ?token,
            "flushed batch"
        );
        self.in_flight = 0;
        self.stats.record_flush(reason, events.len(), bytes);
        Ok(())
    }
}
