//! Bulk load of a log file's existing lines
//!
//! When a session starts, or reloads, it replays what is already on disk
//! before following new writes. [`History::read`] reads the file in one go
//! through `tokio::fs`, off the driver's task, and records how many bytes it
//! consumed so the follower resumes exactly there.
//! Only newline-terminated lines are consumed; a trailing partial line is
//! still being written by its producer and belongs to the follower.

use std::{
    io::{self, ErrorKind},
    path::Path,
};

use tokio::fs;
use tracing::{debug, info};

use crate::buffer::RetentionPolicy;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// The complete, non-blank lines of a log file and the bytes they span.
pub struct History {
    lines: Vec<String>,
    offset: u64,
}

impl History {
    /// Read the history of the log file at `path`.
    ///
    /// A missing file is not an error, it yields an empty history with offset
    /// zero: the producer may not have started yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn read(path: &Path) -> Result<Self, io::Error> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "Log file {path} does not exist yet. Waiting for data...",
                    path = path.display()
                );
                return Ok(Self::default());
            }
            Err(err) => return Err(err),
        };
        Ok(Self::from_bytes(&bytes))
    }

    /// Split raw file contents into a [`History`].
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(pos) => &bytes[..=pos],
            None => &[][..],
        };
        let lines: Vec<String> = complete
            .split(|b| *b == b'\n')
            .map(String::from_utf8_lossy)
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        debug!(
            "history holds {count} lines over {bytes} bytes",
            count = lines.len(),
            bytes = complete.len()
        );
        Self {
            lines,
            offset: complete.len() as u64,
        }
    }

    /// The byte offset just past the last consumed line.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total number of non-blank lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// `true` if there are no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The lines to replay under `policy`: the last `max_size` for a rolling
    /// window, every line when accumulating.
    #[must_use]
    pub fn lines_for(&self, policy: RetentionPolicy) -> &[String] {
        match policy {
            RetentionPolicy::Rolling { max_size } => {
                let skip = self.lines.len().saturating_sub(max_size.get());
                &self.lines[skip..]
            }
            RetentionPolicy::Accumulate => &self.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, num::NonZeroUsize};

    use super::*;

    #[test]
    fn partial_trailing_line_is_not_consumed() {
        let history = History::from_bytes(b"a\n\nb\r\n  \nc");
        assert_eq!(history.len(), 2);
        assert_eq!(history.lines_for(RetentionPolicy::Accumulate), ["a", "b"]);
        assert_eq!(history.offset(), 9);
    }

    #[test]
    fn rolling_skips_to_tail() {
        let history = History::from_bytes(b"1\n2\n3\n4\n");
        let policy = RetentionPolicy::rolling(NonZeroUsize::new(2).expect("non-zero"));
        assert_eq!(history.lines_for(policy), ["3", "4"]);
        let policy = RetentionPolicy::rolling(NonZeroUsize::new(10).expect("non-zero"));
        assert_eq!(history.lines_for(policy).len(), 4);
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = History::read(&dir.path().join("absent.log"))
            .await
            .expect("not an error");
        assert!(history.is_empty());
        assert_eq!(history.offset(), 0);
    }

    #[tokio::test]
    async fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "{{\"timestamp\":1,\"heapUsed\":\"1.00\"}}").expect("write");
        write!(file, "{{\"timestamp\":2,").expect("write");
        let history = History::read(file.path()).await.expect("readable");
        assert_eq!(history.len(), 1);
        assert_eq!(history.offset(), 34);
    }
}
