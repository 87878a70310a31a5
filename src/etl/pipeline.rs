//! Per-table export worker
//!
//! One [`Exporter::perform`] call exports one table: it starts the dump
//! process, streams its output through [`DumpTransform`] into a row queue
//! drained by the table's sink, then finalizes the sink.

use super::{
    DumpCommand, DumpProcess, DumpTransform, RowSender, Sink, TransformStats, drain,
    monitor_stderr, row_queue,
};
use crate::config::{ConnectionConfig, QUEUE_CAPACITY};
use crate::dump::{DumpBinary, dump_args};
use crate::tables::{Table, TableExport};
use eyre::{Context, Result, eyre};
use owo_colors::OwoColorize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of one table's worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    ArgsPrepared,
    ProcessStarted,
    Streaming,
    ProcessExited,
    Finalized,
    SlotReleased,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ArgsPrepared => "args prepared",
            Self::ProcessStarted => "process started",
            Self::Streaming => "streaming",
            Self::ProcessExited => "process exited",
            Self::Finalized => "finalized",
            Self::SlotReleased => "slot released",
        };
        f.write_str(name)
    }
}

struct Progress<'a> {
    table: &'a str,
    state: WorkerState,
}

impl<'a> Progress<'a> {
    fn new(table: &'a str) -> Self {
        Self {
            table,
            state: WorkerState::Idle,
        }
    }

    fn advance(&mut self, next: WorkerState) {
        log::debug!("{}: {} -> {}", self.table, self.state, next);
        self.state = next;
    }
}

/// Opens the sink a table's rows are drained into
pub trait SinkFactory: Send + Sync {
    type Sink: Sink + 'static;

    fn open(&self, table: &Table) -> impl std::future::Future<Output = Result<Self::Sink>> + Send;
}

/// Outcome of one successful table export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub table: String,
    /// Payloads written into the sink
    pub rows: u64,
    pub transform: TransformStats,
    pub elapsed: Duration,
}

/// Exports single tables with a shared dump binary and credentials file
pub struct Exporter<F> {
    conn: Arc<ConnectionConfig>,
    binary: DumpBinary,
    defaults_file: PathBuf,
    sinks: F,
}

impl<F: SinkFactory> Exporter<F> {
    pub fn new(
        conn: Arc<ConnectionConfig>,
        binary: DumpBinary,
        defaults_file: impl Into<PathBuf>,
        sinks: F,
    ) -> Self {
        Self {
            conn,
            binary,
            defaults_file: defaults_file.into(),
            sinks,
        }
    }

    /// Export one table end to end
    ///
    /// Failures while streaming (dump errors on stderr, read errors, a sink
    /// that rejects rows) kill the dump process and fail the table without
    /// finalizing the sink. A dump process that cannot start or exits
    /// unsuccessfully still has its sink finalized before the table is
    /// reported as failed.
    pub async fn perform(&self, table: &Table) -> Result<ExportSummary> {
        let started = Instant::now();
        let result = self.run_worker(table, started).await;
        match &result {
            Ok(summary) => log::info!(
                "Completed {} in {:.2?}: {} rows",
                table.name.cyan(),
                summary.elapsed,
                summary.rows
            ),
            Err(_) => log::info!(
                "Completed {} in {:.2?} with errors",
                table.name.cyan(),
                started.elapsed()
            ),
        }
        result
    }

    async fn run_worker(&self, table: &Table, started: Instant) -> Result<ExportSummary> {
        let mut progress = Progress::new(&table.name);

        let args = dump_args(&self.conn, &self.defaults_file, &table.name);
        let command = DumpCommand::new(&self.binary, args);
        let mut sink = self
            .sinks
            .open(table)
            .await
            .with_context(|| format!("Failed to open the {} sink for {}", self.conn.sink, table.name))?;
        progress.advance(WorkerState::ArgsPrepared);

        let (rows, queue) = row_queue(QUEUE_CAPACITY);
        let drain_task = tokio::spawn(async move {
            let drained = drain(&mut sink, queue).await;
            (sink, drained)
        });

        let mut process_error = None;
        let (mut process, streamed) = match command.spawn() {
            Ok(mut process) => {
                progress.advance(WorkerState::ProcessStarted);
                progress.advance(WorkerState::Streaming);
                let streamed = stream(&mut process, &table.name, rows).await;
                if streamed.is_err() {
                    process.kill();
                }
                (Some(process), streamed)
            }
            Err(e) => {
                log::error!("Could not start the dump for {}: {:#}", table.name, e);
                rows.end_of_data();
                process_error = Some(e);
                (None, Ok(TransformStats::default()))
            }
        };

        let (mut sink, drained) = drain_task
            .await
            .map_err(|e| eyre!("Drain task for {} failed: {}", table.name, e))?;

        if let Some(process) = process.as_mut() {
            match process.wait().await {
                Ok(status) if status.success() => {
                    log::debug!("Dump for {} exited cleanly", table.name);
                }
                Ok(status) => {
                    log::error!("Dump for {} exited with {}", table.name, status);
                    process_error = Some(eyre!("dump process exited with {}", status));
                }
                Err(e) => {
                    log::error!("Could not wait for the dump of {}: {:#}", table.name, e);
                    process_error = Some(e);
                }
            }
            progress.advance(WorkerState::ProcessExited);
        }

        // A sink that fails closes the queue, so its error outranks the transform's
        let (transform, rows) = match (streamed, drained) {
            (Ok(transform), Ok(rows)) => (transform, rows),
            (streamed, Err(e)) => {
                if let Err(stream_error) = streamed {
                    log::debug!("Transform for {} stopped: {:#}", table.name, stream_error);
                }
                return Err(e.wrap_err(format!("Sink for {} stopped draining", table.name)));
            }
            (Err(e), Ok(_)) => return Err(e),
        };

        sink.finish()
            .await
            .with_context(|| format!("Failed to finish the {} sink for {}", self.conn.sink, table.name))?;
        sink.close().await?;
        progress.advance(WorkerState::Finalized);

        let elapsed = started.elapsed();
        if let Some(e) = process_error {
            return Err(e.wrap_err(format!("Dump for {} did not complete", table.name)));
        }

        Ok(ExportSummary {
            table: table.name.clone(),
            rows,
            transform,
            elapsed,
        })
    }
}

/// Run the transform and stderr monitor side by side until both complete
async fn stream(process: &mut DumpProcess, table: &str, rows: RowSender) -> Result<TransformStats> {
    let stdout = process.take_stdout()?;
    let stderr = process.take_stderr()?;

    let transform = DumpTransform::new(table).run(stdout, rows);
    let monitor = monitor_stderr(stderr, table);
    let (stats, ()) = tokio::try_join!(transform, monitor)?;
    Ok(stats)
}

impl<F> TableExport for Exporter<F>
where
    F: SinkFactory + 'static,
{
    async fn export(&self, table: &Table) -> Result<ExportSummary> {
        self.perform(table).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct Recorded {
        rows: Arc<Mutex<Vec<Vec<u8>>>>,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    struct RecordingSink(Recorded);

    impl Sink for RecordingSink {
        async fn write(&mut self, payload: Vec<u8>) -> Result<()> {
            self.0.rows.lock().unwrap().push(payload);
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            self.0.events.lock().unwrap().push("finish");
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.0.events.lock().unwrap().push("close");
            Ok(())
        }
    }

    impl SinkFactory for Recorded {
        type Sink = RecordingSink;

        async fn open(&self, _table: &Table) -> Result<RecordingSink> {
            Ok(RecordingSink(self.clone()))
        }
    }

    struct RefusingSink;

    impl Sink for RefusingSink {
        async fn write(&mut self, _payload: Vec<u8>) -> Result<()> {
            eyre::bail!("PutRecords failed: AccessDeniedException")
        }

        async fn finish(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Refusing;

    impl SinkFactory for Refusing {
        type Sink = RefusingSink;

        async fn open(&self, _table: &Table) -> Result<RefusingSink> {
            Ok(RefusingSink)
        }
    }

    struct Unreachable;

    impl SinkFactory for Unreachable {
        type Sink = RefusingSink;

        async fn open(&self, table: &Table) -> Result<RefusingSink> {
            eyre::bail!("Failed to create stream cdc-{}", table.name)
        }
    }

    fn fake_dump(dir: &TempDir, body: &str) -> DumpBinary {
        let path = dir.path().join("mysqldump");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DumpBinary::new(path)
    }

    fn exporter<F: SinkFactory>(dir: &TempDir, body: &str, sinks: F) -> Exporter<F> {
        let conn = ConnectionConfig::new("localhost", "root", "shop", dir.path());
        Exporter::new(
            Arc::new(conn),
            fake_dump(dir, body),
            dir.path().join("client.cnf"),
            sinks,
        )
    }

    #[tokio::test]
    async fn test_perform_streams_rows() {
        let dir = TempDir::new().unwrap();
        let sinks = Recorded::default();
        let body = "echo '-- dump'\necho \"INSERT INTO t VALUES (1,'x');\"\necho \"INSERT INTO t VALUES (2,'y');\"";
        let exporter = exporter(&dir, body, sinks.clone());

        let summary = exporter.perform(&Table::new("t", dir.path())).await.unwrap();

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.transform.skipped, 1);
        assert_eq!(*sinks.rows.lock().unwrap(), vec![b"1,'x'".to_vec(), b"2,'y'".to_vec()]);
        assert_eq!(*sinks.events.lock().unwrap(), vec!["finish", "close"]);
    }

    #[tokio::test]
    async fn test_stderr_fails_without_finalize() {
        let dir = TempDir::new().unwrap();
        let sinks = Recorded::default();
        let body = "echo 'mysqldump: Got error: 1146: Table does not exist' >&2\nsleep 5";
        let exporter = exporter(&dir, body, sinks.clone());

        let result = exporter.perform(&Table::new("missing", dir.path())).await;

        assert!(result.is_err());
        assert!(sinks.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_finalizes() {
        let dir = TempDir::new().unwrap();
        let sinks = Recorded::default();
        let body = "echo \"INSERT INTO t VALUES (1,'x');\"\nexit 3";
        let exporter = exporter(&dir, body, sinks.clone());

        let result = exporter.perform(&Table::new("t", dir.path())).await;

        assert!(result.is_err());
        assert_eq!(*sinks.rows.lock().unwrap(), vec![b"1,'x'".to_vec()]);
        assert_eq!(*sinks.events.lock().unwrap(), vec!["finish", "close"]);
    }

    #[tokio::test]
    async fn test_start_failure_still_finalizes() {
        let dir = TempDir::new().unwrap();
        let sinks = Recorded::default();
        let conn = ConnectionConfig::new("localhost", "root", "shop", dir.path());
        let exporter = Exporter::new(
            Arc::new(conn),
            DumpBinary::new(dir.path().join("no-such-binary")),
            dir.path().join("client.cnf"),
            sinks.clone(),
        );

        let result = exporter.perform(&Table::new("t", dir.path())).await;

        assert!(result.is_err());
        assert!(sinks.rows.lock().unwrap().is_empty());
        assert_eq!(*sinks.events.lock().unwrap(), vec!["finish", "close"]);
    }

    #[tokio::test]
    async fn test_sink_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "yes \"INSERT INTO t VALUES (1,'x');\" | head -n {}",
            QUEUE_CAPACITY * 3
        );
        let exporter = exporter(&dir, &body, Refusing);

        let result = exporter.perform(&Table::new("t", dir.path())).await;

        let message = format!("{:#}", result.err().unwrap());
        assert!(message.contains("AccessDeniedException"), "{}", message);
        assert!(message.contains("stopped draining"));
    }

    #[tokio::test]
    async fn test_unopenable_sink_never_starts_dump() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("started");
        let body = format!("touch {}", marker.display());
        let exporter = exporter(&dir, &body, Unreachable);

        let result = exporter.perform(&Table::new("orders", dir.path())).await;

        let message = format!("{:#}", result.err().unwrap());
        assert!(message.contains("cdc-orders"));
        assert!(!marker.exists());
    }
}
