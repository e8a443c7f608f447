//! Follow a growing log file
//!
//! The [`Follower`] polls its file and hands back each complete line written
//! past its offset. A line is complete once its newline lands; bytes after the
//! last newline are held until the producer finishes them. If the file shrinks
//! below the offset it was truncated or replaced, and following restarts from
//! the beginning. A file that does not exist yet is waited on.
//!
//! ## Metrics
//!
//! `bytes_read`: Bytes read from the followed file
//! `file_truncations`: Times the followed file shrank under the follower
//!

use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    time::Duration,
};

use metrics::counter;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, info};

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Follower`].
pub enum Error {
    /// The file exists but could not be read.
    #[error("Failed to read followed file: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
/// Reads complete lines appended to a file past a byte offset.
pub struct Follower {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl Follower {
    /// Create a new [`Follower`] for `path` resuming at `offset`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            partial: Vec::new(),
        }
    }

    /// The followed file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte. Includes a held partial line.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Resume at `offset`, discarding any held partial line. Called after a
    /// history replay so replayed lines are never seen twice.
    pub fn seek(&mut self, offset: u64) {
        debug!("follower seek to {offset}");
        self.offset = offset;
        self.partial.clear();
    }

    /// Read whatever was appended since the last poll and return the complete
    /// lines, in order. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn poll(&mut self) -> Result<Vec<String>, Error> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            info!(
                "{path} shrank from {offset} to {len} bytes, following from the start",
                path = self.path.display(),
                offset = self.offset,
            );
            counter!("file_truncations").increment(1);
            self.seek(0);
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::with_capacity(usize::try_from(len - self.offset).unwrap_or(0));
        let read = file.read_to_end(&mut chunk).await?;
        self.offset += read as u64;
        counter!("bytes_read").increment(read as u64);

        self.partial.extend_from_slice(&chunk);
        Ok(self.drain_lines())
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let Some(last) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.partial.drain(..=last).collect();
        complete
            .split(|b| *b == b'\n')
            .map(String::from_utf8_lossy)
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.trim().is_empty())
            .collect()
    }
}
