//! Extract, transform, load for one table
//!
//! - extract: the dump process and its stderr monitor
//! - transform: dump lines into row payloads
//! - load: the [`Sink`] contract and the bounded row queue feeding it
//! - pipeline: the per-table worker tying the three together

mod extract;
mod load;
mod pipeline;
mod transform;

pub use extract::{DumpCommand, DumpProcess, monitor_stderr};
pub use load::{QueueGauge, RowReceiver, RowSender, Sink, drain, row_queue};
pub use pipeline::{ExportSummary, Exporter, SinkFactory, WorkerState};
pub use transform::{DATA_LINE_PREFIX, DumpTransform, LineOutcome, MAX_LINE_LENGTH, TransformStats, VALUES_MARKER};
