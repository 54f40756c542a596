pub mod tailer;

pub use tailer::{LineSource, TailEvent, Tailer, TailerError};
