use std::collections::VecDeque;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TailerError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one probe of a line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete line, terminator included.
    Line(String),
    /// Nothing new yet.
    Idle,
    /// The shutdown sentinel was read; no further lines will be produced.
    Stop,
}

/// Non-blocking producer of appended lines.
pub trait LineSource {
    fn poll_line(&mut self) -> Result<TailEvent, TailerError>;
}

/// Replays a fixed script, then reports `Stop` once exhausted.
impl LineSource for VecDeque<TailEvent> {
    fn poll_line(&mut self) -> Result<TailEvent, TailerError> {
        Ok(self.pop_front().unwrap_or(TailEvent::Stop))
    }
}

/// Follows a file from its end, yielding each newly appended line.
///
/// Partial lines are held back until their newline arrives. When the path is
/// rotated (new inode) or truncated (length below our offset) the tailer
/// reopens it from the start.
pub struct Tailer {
    path: PathBuf,
    sentinel: String,
    reader: BufReader<File>,
    offset: u64,
    inode: u64,
    partial: Vec<u8>,
    stopped: bool,
}

impl Tailer {
    /// Open `path` positioned at its current end; earlier content is skipped.
    pub fn open(path: impl AsRef<Path>, sentinel: impl Into<String>) -> Result<Self, TailerError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| io_error(&path, e))?;
        let inode = get_inode(&file.metadata().map_err(|e| io_error(&path, e))?);

        let mut reader = BufReader::new(file);
        let offset = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| io_error(&path, e))?;

        info!(path = %path.display(), offset, "tailing file from end");

        Ok(Self {
            path,
            sentinel: sentinel.into(),
            reader,
            offset,
            inode,
            partial: Vec::new(),
            stopped: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next read in the currently open file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_line(&mut self) -> Result<TailEvent, TailerError> {
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.partial)
            .map_err(|e| io_error(&self.path, e))?;
        self.offset += bytes_read as u64;

        if self.partial.last() != Some(&b'\n') {
            // EOF, possibly in the middle of a line still being written.
            if bytes_read == 0 {
                // A sentinel may be appended without a trailing newline.
                if String::from_utf8_lossy(&self.partial).trim() == self.sentinel {
                    return Ok(self.stop());
                }
                self.check_rotation()?;
            }
            return Ok(TailEvent::Idle);
        }

        let raw = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&raw).into_owned();

        if line.trim() == self.sentinel {
            return Ok(self.stop());
        }

        Ok(TailEvent::Line(line))
    }

    fn stop(&mut self) -> TailEvent {
        info!(path = %self.path.display(), "shutdown sentinel read");
        self.partial.clear();
        self.stopped = true;
        TailEvent::Stop
    }

    fn check_rotation(&mut self) -> Result<(), TailerError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "file missing; waiting for it to reappear");
                return Ok(());
            }
            Err(e) => return Err(io_error(&self.path, e)),
        };

        let current_inode = get_inode(&metadata);
        if current_inode != self.inode {
            warn!(
                path = %self.path.display(),
                previous_offset = self.offset,
                "file rotated; reopening from start"
            );
            self.reopen()?;
        } else if metadata.len() < self.offset {
            warn!(
                path = %self.path.display(),
                previous_offset = self.offset,
                current_size = metadata.len(),
                "file truncated; reading from start"
            );
            self.reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| io_error(&self.path, e))?;
            self.offset = 0;
            self.discard_partial();
        }

        Ok(())
    }

    fn reopen(&mut self) -> Result<(), TailerError> {
        let file = File::open(&self.path).map_err(|e| io_error(&self.path, e))?;
        self.inode = get_inode(&file.metadata().map_err(|e| io_error(&self.path, e))?);
        self.reader = BufReader::new(file);
        self.offset = 0;
        self.discard_partial();
        Ok(())
    }

    fn discard_partial(&mut self) {
        if !self.partial.is_empty() {
            warn!(
                path = %self.path.display(),
                bytes = self.partial.len(),
                "dropping unterminated line from previous file"
            );
            self.partial.clear();
        }
    }
}

impl LineSource for Tailer {
    fn poll_line(&mut self) -> Result<TailEvent, TailerError> {
        if self.stopped {
            return Ok(TailEvent::Stop);
        }
        self.read_line()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> TailerError {
    TailerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

// Without inodes only truncation is detected.
#[cfg(not(unix))]
fn get_inode(_metadata: &Metadata) -> u64 {
    0
}
