//! Record batching and the put/retry loop

use super::{PutEntry, StreamClient};
use crate::config::RetryPolicy;
use crate::record::Record;
use eyre::{Result, bail};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Most records the stream accepts in one put call
pub const MAX_RECORDS_PER_PUT: usize = 500;

/// Counters shared with the stats ticker
#[derive(Debug, Default)]
pub struct PutStats {
    pending: AtomicU64,
    puts: AtomicU64,
    records: AtomicU64,
    errors: AtomicU64,
}

impl PutStats {
    /// Records waiting in the batch
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Put calls made
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Records accepted by the stream
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Per-record failures reported by the stream
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Pending records for one stream
pub struct BatchWriter<K> {
    client: Arc<K>,
    stream: String,
    pending: VecDeque<Record>,
    retry: RetryPolicy,
    stats: Arc<PutStats>,
}

impl<K: StreamClient> BatchWriter<K> {
    pub fn new(client: Arc<K>, stream: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            stream: stream.into(),
            pending: VecDeque::new(),
            retry,
            stats: Arc::default(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn stats(&self) -> Arc<PutStats> {
        Arc::clone(&self.stats)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push(&mut self, record: Record) {
        self.pending.push_back(record);
        self.sync_pending();
    }

    fn sync_pending(&self) {
        self.stats
            .pending
            .store(self.pending.len() as u64, Ordering::Relaxed);
    }

    /// Put every pending record, retrying the ones the stream rejects
    ///
    /// Records go out in chunks of at most [`MAX_RECORDS_PER_PUT`]. Records
    /// the stream marks as failed return to the front of the batch in their
    /// original order and are put again, until none fail or the retry policy
    /// runs out.
    ///
    /// # Errors
    /// A transport error returns immediately, leaving the unsent chunk at the
    /// front of the batch. Exhausting the retry policy is also an error.
    pub async fn put_records(&mut self) -> Result<()> {
        let mut retries = 0u32;

        while !self.pending.is_empty() {
            let take = self.pending.len().min(MAX_RECORDS_PER_PUT);
            let entries = self
                .pending
                .iter()
                .take(take)
                .map(|record| {
                    Ok(PutEntry {
                        partition_key: record.partition_key(),
                        data: record.to_json()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let chunk: Vec<Record> = self.pending.drain(..take).collect();

            let outcome = match self.client.put_records(&self.stream, entries).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.requeue(chunk);
                    return Err(e.wrap_err(format!("Failed to put records to {}", self.stream)));
                }
            };
            self.stats.puts.fetch_add(1, Ordering::Relaxed);

            let marked = outcome.failed_indexes().len();
            if outcome.failed_record_count != marked {
                log::debug!(
                    "{} reported {} failed records but marked {}",
                    self.stream,
                    outcome.failed_record_count,
                    marked
                );
            }

            let sent = chunk.len();
            let mut failed = Vec::new();
            for (index, record) in chunk.into_iter().enumerate() {
                if outcome.is_failed(index) {
                    failed.push(record);
                }
            }

            let accepted = sent - failed.len();
            self.stats.records.fetch_add(accepted as u64, Ordering::Relaxed);

            if failed.is_empty() {
                self.sync_pending();
                continue;
            }

            self.stats
                .errors
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
            let failed_count = failed.len();
            self.requeue(failed);

            if !self.retry.allows(retries) {
                bail!(
                    "{} records to {} still failing after {} retries",
                    failed_count,
                    self.stream,
                    retries
                );
            }
            retries += 1;
            log::debug!(
                "Retrying {} failed records to {} (retry {})",
                failed_count,
                self.stream,
                retries
            );
            if !self.retry.backoff.is_zero() {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        Ok(())
    }

    fn requeue(&mut self, records: Vec<Record>) {
        for record in records.into_iter().rev() {
            self.pending.push_front(record);
        }
        self.sync_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use crate::sink::{PutOutcome, StreamStatus};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails the listed partition keys once each, accepts everything else
    #[derive(Default)]
    struct FlakyStream {
        calls: Mutex<Vec<Vec<String>>>,
        fail_once: Mutex<HashSet<String>>,
        transport_error: bool,
    }

    impl StreamClient for FlakyStream {
        async fn stream_status(&self, _stream: &str) -> Result<StreamStatus> {
            Ok(StreamStatus::Active)
        }

        async fn create_stream(&self, _stream: &str, _shards: i32) -> Result<()> {
            Ok(())
        }

        async fn put_records(&self, _stream: &str, entries: Vec<PutEntry>) -> Result<PutOutcome> {
            if self.transport_error {
                bail!("connection refused");
            }
            let keys: Vec<String> = entries.iter().map(|e| e.partition_key.clone()).collect();
            let mut fail_once = self.fail_once.lock().unwrap();
            let errors: Vec<Option<String>> = keys
                .iter()
                .map(|k| {
                    fail_once
                        .remove(k)
                        .then(|| "ProvisionedThroughputExceededException".to_string())
                })
                .collect();
            self.calls.lock().unwrap().push(keys);
            Ok(PutOutcome::new(errors))
        }
    }

    fn record(id: i64) -> Record {
        let mut record = Record::default();
        record.insert("id", FieldValue::Int(id));
        record
    }

    fn writer(client: Arc<FlakyStream>, retry: RetryPolicy) -> BatchWriter<FlakyStream> {
        BatchWriter::new(client, "stream", retry)
    }

    #[tokio::test]
    async fn test_one_put_per_chunk() {
        let client = Arc::new(FlakyStream::default());
        let mut batch = writer(client.clone(), RetryPolicy::default());
        for id in 0..1200 {
            batch.push(record(id));
        }

        batch.put_records().await.unwrap();

        let calls = client.calls.lock().unwrap();
        let sizes: Vec<usize> = calls.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![500, 500, 200]);
        assert!(batch.is_empty());
        assert_eq!(batch.stats().records(), 1200);
        assert_eq!(batch.stats().pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_records_requeued_in_order() {
        let client = Arc::new(FlakyStream::default());
        client
            .fail_once
            .lock()
            .unwrap()
            .extend(["1", "3", "4"].map(String::from));
        let mut batch = writer(client.clone(), RetryPolicy::default());
        for id in 0..6 {
            batch.push(record(id));
        }

        batch.put_records().await.unwrap();

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], vec!["1", "3", "4"]);
        assert_eq!(batch.stats().errors(), 3);
        assert_eq!(batch.stats().records(), 6);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_retries_go_ahead_of_remaining_records() {
        let client = Arc::new(FlakyStream::default());
        client.fail_once.lock().unwrap().insert("499".to_string());
        let mut batch = writer(client.clone(), RetryPolicy::default());
        for id in 0..700 {
            batch.push(record(id));
        }

        batch.put_records().await.unwrap();

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 201);
        assert_eq!(calls[1][0], "499");
        assert_eq!(calls[1][1], "500");
    }

    #[tokio::test]
    async fn test_transport_error_keeps_records() {
        let client = Arc::new(FlakyStream {
            transport_error: true,
            ..Default::default()
        });
        let mut batch = writer(client, RetryPolicy::default());
        batch.push(record(1));
        batch.push(record(2));

        assert!(batch.put_records().await.is_err());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.stats().pending(), 2);
    }

    #[tokio::test]
    async fn test_bounded_retry_gives_up() {
        struct AlwaysFails;

        impl StreamClient for AlwaysFails {
            async fn stream_status(&self, _stream: &str) -> Result<StreamStatus> {
                Ok(StreamStatus::Active)
            }

            async fn create_stream(&self, _stream: &str, _shards: i32) -> Result<()> {
                Ok(())
            }

            async fn put_records(&self, _stream: &str, entries: Vec<PutEntry>) -> Result<PutOutcome> {
                Ok(PutOutcome::new(
                    entries.iter().map(|_| Some("InternalFailure".to_string())).collect(),
                ))
            }
        }

        let retry = RetryPolicy::bounded(2, std::time::Duration::ZERO);
        let mut batch = BatchWriter::new(Arc::new(AlwaysFails), "stream", retry);
        batch.push(record(1));

        let err = batch.put_records().await.unwrap_err();
        assert!(format!("{}", err).contains("after 2 retries"));
        assert_eq!(batch.stats().puts(), 3);
        assert_eq!(batch.len(), 1);
    }
}
