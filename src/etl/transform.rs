//! Dump output transform
//!
//! Turns the dump's standard output into row payloads. Only lines starting
//! with `INSERT` carry data; everything else is dropped. The offset just past
//! `VALUES (` is measured on the first data line and reused for the rest of
//! the table, since every `INSERT` line of a table shares the same preamble.
//!
//! Lines are handled as raw bytes: binary columns dumped without `--hex-blob`
//! reach the sink exactly as the dump wrote them.

use super::RowSender;
use eyre::{Context, Result, bail};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Lines must start with this token to be data lines
pub const DATA_LINE_PREFIX: &[u8] = b"INSERT";

/// Marker preceding the value tuple of a data line
pub const VALUES_MARKER: &[u8] = b"VALUES (";

/// Longest dump line accepted, 16 MiB, not counting the line terminator
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Statement terminator trimmed from each data line: `);`
const LINE_SUFFIX_LEN: usize = 2;

/// What a single dump line turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome<'a> {
    /// Not a data line
    Skipped,
    /// The value tuple of a data line
    Payload(&'a [u8]),
    /// A data line too short to hold a value tuple
    Malformed,
}

/// Counters for one transform run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub lines: u64,
    pub forwarded: u64,
    pub skipped: u64,
    pub malformed: u64,
}

/// Streaming transform from dump lines to row payloads for one table
///
/// # Example
/// ```
/// use skrape::etl::{DumpTransform, LineOutcome};
///
/// let mut transform = DumpTransform::new("t");
/// assert_eq!(
///     transform.extract(b"INSERT INTO `t` VALUES (1,'x');"),
///     LineOutcome::Payload(b"1,'x'")
/// );
/// assert_eq!(transform.extract(b"-- comment"), LineOutcome::Skipped);
/// ```
#[derive(Debug, Clone)]
pub struct DumpTransform {
    table: String,
    prefix_len: Option<usize>,
    stats: TransformStats,
}

impl DumpTransform {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            prefix_len: None,
            stats: TransformStats::default(),
        }
    }

    /// Offset of the value tuple, once the first data line has been seen
    pub fn prefix_len(&self) -> Option<usize> {
        self.prefix_len
    }

    pub fn stats(&self) -> TransformStats {
        self.stats
    }

    /// Classify one line and extract its payload
    pub fn extract<'a>(&mut self, line: &'a [u8]) -> LineOutcome<'a> {
        self.stats.lines += 1;

        if !line.starts_with(DATA_LINE_PREFIX) {
            self.stats.skipped += 1;
            return LineOutcome::Skipped;
        }

        let prefix_len = match self.prefix_len {
            Some(len) => len,
            None => match find_marker(line) {
                Some(idx) => {
                    let len = idx + VALUES_MARKER.len();
                    log::debug!("Value tuples of {} start at offset {}", self.table, len);
                    self.prefix_len = Some(len);
                    len
                }
                None => {
                    self.stats.malformed += 1;
                    return LineOutcome::Malformed;
                }
            },
        };

        let payload = if line.len() > prefix_len {
            line.get(prefix_len..line.len().saturating_sub(LINE_SUFFIX_LEN))
        } else {
            None
        };

        match payload {
            Some(payload) => {
                self.stats.forwarded += 1;
                LineOutcome::Payload(payload)
            }
            None => {
                self.stats.malformed += 1;
                LineOutcome::Malformed
            }
        }
    }

    /// Read the whole stream, forwarding payloads into the row queue
    ///
    /// The queue is closed when the stream ends, whether or not reading
    /// succeeded.
    ///
    /// # Errors
    /// Returns an error if reading fails, a line exceeds [`MAX_LINE_LENGTH`],
    /// or the sink stops draining.
    pub async fn run<R>(mut self, reader: R, rows: RowSender) -> Result<TransformStats>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        log::info!("Begin scanning for: {}", self.table.cyan());
        let mut reader = reader;
        let mut buf = Vec::with_capacity(64 * 1024);

        loop {
            buf.clear();
            // Room for the longest line plus a CRLF terminator
            let read = (&mut reader)
                .take(MAX_LINE_LENGTH as u64 + 2)
                .read_until(b'\n', &mut buf)
                .await
                .with_context(|| format!("Failed to read dump output for {}", self.table))?;
            if read == 0 {
                break;
            }

            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            if buf.len() > MAX_LINE_LENGTH {
                bail!(
                    "Dump line for {} exceeds {} bytes",
                    self.table,
                    MAX_LINE_LENGTH
                );
            }

            match self.extract(&buf) {
                LineOutcome::Payload(payload) => rows.accept_row(payload.to_vec()).await?,
                LineOutcome::Malformed => {
                    log::warn!(
                        "Malformed line for {}: {}",
                        self.table,
                        String::from_utf8_lossy(&buf)
                    )
                }
                LineOutcome::Skipped => {}
            }
        }

        rows.end_of_data();
        log::debug!("Closed the row queue for {}", self.table);
        Ok(self.stats)
    }
}

fn find_marker(line: &[u8]) -> Option<usize> {
    line.windows(VALUES_MARKER.len())
        .position(|window| window == VALUES_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::row_queue;

    async fn collect(input: &[u8]) -> (Vec<Vec<u8>>, TransformStats) {
        let (tx, mut rx) = row_queue(1000);
        let stats = DumpTransform::new("t").run(input, tx).await.unwrap();

        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row);
        }
        (rows, stats)
    }

    fn rows(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|row| row.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_insert_lines_become_payloads() {
        let input = b"INSERT INTO t VALUES (1,'x');\nINSERT INTO t VALUES (2,'y');\n";
        let (payloads, stats) = collect(input).await;

        assert_eq!(payloads, rows(&["1,'x'", "2,'y'"]));
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.lines, 2);
    }

    #[tokio::test]
    async fn test_non_data_lines_dropped() {
        let input = b"-- MySQL dump\n/*!40101 SET NAMES utf8 */;\n\nINSERT INTO t VALUES (1,'x');\nLOCK TABLES t WRITE;\nINSERT INTO t VALUES (2,'y');";
        let (payloads, stats) = collect(input).await;

        assert_eq!(payloads, rows(&["1,'x'", "2,'y'"]));
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.forwarded as usize, payloads.len());
    }

    #[tokio::test]
    async fn test_crlf_lines() {
        let (payloads, _) = collect(b"INSERT INTO t VALUES (3,'z');\r\n").await;
        assert_eq!(payloads, rows(&["3,'z'"]));
    }

    #[tokio::test]
    async fn test_binary_values_pass_through() {
        let (payloads, stats) = collect(b"INSERT INTO t VALUES (1,'\xff\xfe');\n").await;

        assert_eq!(payloads, vec![b"1,'\xff\xfe'".to_vec()]);
        assert_eq!(stats.malformed, 0);
    }

    #[test]
    fn test_prefix_measured_once() {
        let mut transform = DumpTransform::new("t");
        assert_eq!(
            transform.extract(b"INSERT INTO `t` VALUES (1);"),
            LineOutcome::Payload(b"1")
        );
        let prefix = transform.prefix_len().unwrap();
        assert_eq!(prefix, "INSERT INTO `t` VALUES (".len());

        // Later lines are cut at the same offset without re-scanning
        assert_eq!(
            transform.extract(b"INSERT INTO `t` VALUES (22);"),
            LineOutcome::Payload(b"22")
        );
        assert_eq!(transform.prefix_len(), Some(prefix));
    }

    #[test]
    fn test_short_lines_malformed() {
        let mut transform = DumpTransform::new("t");
        transform.extract(b"INSERT INTO t VALUES (1);");

        assert_eq!(transform.extract(b"INSERT"), LineOutcome::Malformed);
        assert_eq!(
            transform.extract(b"INSERT INTO t VALUES ("),
            LineOutcome::Malformed
        );
        assert_eq!(transform.stats().malformed, 2);
        assert_eq!(transform.stats().forwarded, 1);
    }

    #[test]
    fn test_insert_without_marker_is_malformed() {
        let mut transform = DumpTransform::new("t");
        assert_eq!(transform.extract(b"INSERT garbage"), LineOutcome::Malformed);
        assert_eq!(transform.prefix_len(), None);
    }

    #[tokio::test]
    async fn test_overlong_line_is_an_error() {
        let line = format!("INSERT INTO t VALUES ({});\n", "9".repeat(MAX_LINE_LENGTH));
        let (tx, _rx) = row_queue(10);
        let result = DumpTransform::new("t").run(line.as_bytes(), tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_line_at_the_cap_is_accepted() {
        let preamble = "INSERT INTO t VALUES (";
        let values = "9".repeat(MAX_LINE_LENGTH - preamble.len() - 2);
        let line = format!("{}{});\r\n", preamble, values);
        assert_eq!(line.len(), MAX_LINE_LENGTH + 2);

        let (payloads, stats) = collect(line.as_bytes()).await;
        assert_eq!(stats.forwarded, 1);
        assert_eq!(payloads[0].len(), values.len());
    }
}
