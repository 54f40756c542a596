use chrono::Utc;
use tracing::warn;

/// A single line stamped with its ingestion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }

    /// Stamp `message` with the current wall-clock time.
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(Utc::now().timestamp_millis(), message)
    }

    pub fn byte_len(&self) -> usize {
        self.message.len()
    }
}

/// Ceilings a batch must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_events: usize,
    pub max_bytes: usize,
}

/// Events accumulated for one put, with their running byte size.
#[derive(Debug, Default)]
pub struct Batch {
    events: Vec<LogEvent>,
    bytes: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Whether adding `event` would take the batch over either ceiling.
    pub fn would_overflow(&self, event: &LogEvent, limits: BatchLimits) -> bool {
        self.events.len() + 1 > limits.max_events || self.bytes + event.byte_len() > limits.max_bytes
    }

    /// Whether the batch sits exactly at a ceiling and can take nothing more.
    pub fn is_full(&self, limits: BatchLimits) -> bool {
        self.events.len() >= limits.max_events || self.bytes >= limits.max_bytes
    }

    pub fn push(&mut self, event: LogEvent) {
        self.bytes += event.byte_len();
        self.events.push(event);
    }

    /// Sort by timestamp (stable, so equal stamps keep read order) and hand
    /// the events over, leaving the batch empty.
    pub fn take_sorted(&mut self) -> Vec<LogEvent> {
        self.bytes = 0;
        let mut events = std::mem::take(&mut self.events);
        events.sort_by_key(|event| event.timestamp);
        events
    }
}

/// Cut `event`'s message down to `max_bytes` on a char boundary.
pub fn truncate_to_fit(event: &mut LogEvent, max_bytes: usize) {
    if event.message.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !event.message.is_char_boundary(cut) {
        cut -= 1;
    }
    warn!(
        original_bytes = event.message.len(),
        kept_bytes = cut,
        "line larger than batch byte ceiling; truncating"
    );
    event.message.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: BatchLimits = BatchLimits {
        max_events: 3,
        max_bytes: 10,
    };

    #[test]
    fn test_push_tracks_utf8_bytes() {
        let mut batch = Batch::new();
        batch.push(LogEvent::new(1, "héllo\n"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.bytes(), 7);
    }

    #[test]
    fn test_would_overflow_on_count() {
        let mut batch = Batch::new();
        for i in 0..3 {
            batch.push(LogEvent::new(i, "x"));
        }
        assert!(batch.is_full(LIMITS));
        assert!(batch.would_overflow(&LogEvent::new(4, "y"), LIMITS));
    }

    #[test]
    fn test_would_overflow_on_bytes() {
        let mut batch = Batch::new();
        batch.push(LogEvent::new(1, "123456"));
        assert!(!batch.would_overflow(&LogEvent::new(2, "1234"), LIMITS));
        assert!(batch.would_overflow(&LogEvent::new(2, "12345"), LIMITS));
    }

    #[test]
    fn test_take_sorted_is_stable_and_resets() {
        let mut batch = Batch::new();
        batch.push(LogEvent::new(20, "c"));
        batch.push(LogEvent::new(10, "a"));
        batch.push(LogEvent::new(10, "b"));

        let events = batch.take_sorted();
        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
        assert!(batch.is_empty());
        assert_eq!(batch.bytes(), 0);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut event = LogEvent::new(1, "aé€");
        // "a" = 1 byte, "é" = 2 bytes, "€" = 3 bytes
        truncate_to_fit(&mut event, 4);
        assert_eq!(event.message, "aé");

        let mut short = LogEvent::new(1, "ok");
        truncate_to_fit(&mut short, 4);
        assert_eq!(short.message, "ok");
    }
}
