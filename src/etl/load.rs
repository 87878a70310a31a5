//! Sink contract and the bounded row queue feeding it

use eyre::{Result, eyre};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Sink trait for persisting or shipping row payloads
///
/// A sink is driven in three phases:
/// 1. [`write`](Sink::write) for every payload drained from the row queue
/// 2. [`finish`](Sink::finish) once, after the queue is drained and the dump
///    process has exited, for anything that needs the complete data set
/// 3. [`close`](Sink::close) to release handles and buffers, never before `finish`
///
/// # Example
/// ```no_run
/// use skrape::etl::Sink;
/// use eyre::Result;
///
/// struct CountingSink {
///     rows: usize,
/// }
///
/// impl Sink for CountingSink {
///     async fn write(&mut self, _payload: Vec<u8>) -> Result<()> {
///         self.rows += 1;
///         Ok(())
///     }
///
///     async fn finish(&mut self) -> Result<()> {
///         println!("{} rows", self.rows);
///         Ok(())
///     }
///
///     async fn close(&mut self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Sink: Send {
    /// Persist one payload
    ///
    /// # Errors
    /// Returns an error when the destination cannot take the payload; the
    /// drain stops and the table fails.
    fn write(&mut self, payload: Vec<u8>) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Called when draining starts, with a gauge of the pending queue depth
    fn observe_queue(&mut self, _queue: QueueGauge) {}

    /// End-of-stream action: flush, upload, or final batch put
    fn finish(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Release owned resources
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Shared count of payloads waiting in a row queue
#[derive(Debug, Clone, Default)]
pub struct QueueGauge(Arc<AtomicUsize>);

impl QueueGauge {
    pub fn depth(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn decr(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Create a bounded FIFO queue of row payloads
pub fn row_queue(capacity: usize) -> (RowSender, RowReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let gauge = QueueGauge::default();
    (
        RowSender {
            tx,
            gauge: gauge.clone(),
        },
        RowReceiver { rx, gauge },
    )
}

/// Producer side of the row queue, owned by the transform
///
/// Dropping it (or calling [`end_of_data`](RowSender::end_of_data)) closes
/// the queue; that happens exactly once since the sender is not cloneable.
#[derive(Debug)]
pub struct RowSender {
    tx: mpsc::Sender<Vec<u8>>,
    gauge: QueueGauge,
}

impl RowSender {
    /// Enqueue a payload, waiting while the queue is full
    ///
    /// # Errors
    /// Returns an error if the sink side has stopped draining.
    pub async fn accept_row(&self, payload: Vec<u8>) -> Result<()> {
        self.gauge.incr();
        if self.tx.send(payload).await.is_err() {
            self.gauge.decr();
            return Err(eyre!("row queue closed, the sink stopped draining"));
        }
        Ok(())
    }

    /// Close the queue; the sink drains what is left and stops
    pub fn end_of_data(self) {
        drop(self);
    }
}

/// Consumer side of the row queue, owned by the drain task
#[derive(Debug)]
pub struct RowReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
    gauge: QueueGauge,
}

impl RowReceiver {
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        let payload = self.rx.recv().await;
        if payload.is_some() {
            self.gauge.decr();
        }
        payload
    }

    pub fn gauge(&self) -> QueueGauge {
        self.gauge.clone()
    }
}

/// Write every queued payload into the sink until the queue is closed
///
/// Returns the number of payloads written.
pub async fn drain<S: Sink>(sink: &mut S, mut queue: RowReceiver) -> Result<u64> {
    sink.observe_queue(queue.gauge());

    let mut count = 0u64;
    while let Some(payload) = queue.recv().await {
        sink.write(payload).await?;
        count += 1;
    }
    log::debug!("Row queue closed after {} payloads", count);
    Ok(count)
}
