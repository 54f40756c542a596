#![allow(dead_code)]

use cwtail::config::{BatchConfig, Config, DestinationConfig, SourceConfig};
use cwtail::source::{LineSource, TailEvent, TailerError};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const GROUP: &str = "test-group";
pub const STREAM: &str = "test-stream";

pub fn fast_batch_config() -> BatchConfig {
    BatchConfig {
        max_events: 500,
        max_bytes: 800_000,
        flush_interval: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
    }
}

pub fn test_config(path: PathBuf) -> Config {
    Config {
        source: SourceConfig {
            path,
            sentinel: "__CW_STOP__".to_string(),
        },
        destination: DestinationConfig {
            log_group: GROUP.to_string(),
            log_stream: STREAM.to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            timeout: None,
        },
        batch: fast_batch_config(),
    }
}

pub fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

pub enum Step {
    Event(TailEvent),
    Call(Box<dyn FnMut() + Send>),
}

/// Scripted line source that can run side effects between events, e.g. to
/// move the backend's token behind the shipper's back.
#[derive(Default)]
pub struct HookedSource {
    steps: VecDeque<Step>,
}

impl HookedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, text: &str) -> Self {
        self.steps
            .push_back(Step::Event(TailEvent::Line(text.to_string())));
        self
    }

    pub fn idle(mut self, times: usize) -> Self {
        for _ in 0..times {
            self.steps.push_back(Step::Event(TailEvent::Idle));
        }
        self
    }

    pub fn call(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.steps.push_back(Step::Call(Box::new(f)));
        self
    }
}

impl LineSource for HookedSource {
    fn poll_line(&mut self) -> Result<TailEvent, TailerError> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Event(event)) => return Ok(event),
                Some(Step::Call(mut f)) => f(),
                None => return Ok(TailEvent::Stop),
            }
        }
    }
}
