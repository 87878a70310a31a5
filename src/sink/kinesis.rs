//! Kinesis sink: typed JSON records put to a stream

use super::batch::{BatchWriter, PutStats};
use crate::config::KinesisConfig;
use crate::dump::parse_values;
use crate::etl::{QueueGauge, Sink};
use crate::record::Record;
use crate::schema::Schema;
use eyre::{Context, Result, bail};
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Period of the progress log line
pub const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Wait between stream status checks after creating a stream
pub const ACTIVATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Status checks before giving up on a stream becoming active
pub const ACTIVATION_MAX_POLLS: u32 = 60;

/// State of a stream as far as the sink cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Missing,
    Creating,
    Active,
    Updating,
    Deleting,
    Other(String),
}

impl StreamStatus {
    fn is_writable(&self) -> bool {
        matches!(self, Self::Active | Self::Updating)
    }
}

/// One record of a put call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutEntry {
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Result of one put call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Failure count as reported by the stream
    pub failed_record_count: usize,
    /// Error code per submitted record, in submission order
    pub errors: Vec<Option<String>>,
}

impl PutOutcome {
    /// Outcome whose failure count matches the error markers
    pub fn new(errors: Vec<Option<String>>) -> Self {
        Self {
            failed_record_count: errors.iter().filter(|e| e.is_some()).count(),
            errors,
        }
    }

    pub fn is_failed(&self, index: usize) -> bool {
        self.errors.get(index).is_some_and(Option::is_some)
    }

    pub fn failed_indexes(&self) -> Vec<usize> {
        (0..self.errors.len()).filter(|&i| self.is_failed(i)).collect()
    }
}

/// Stream service used by the Kinesis sink
pub trait StreamClient: Send + Sync {
    /// Current status, [`StreamStatus::Missing`] when the stream does not exist
    fn stream_status(
        &self,
        stream: &str,
    ) -> impl std::future::Future<Output = Result<StreamStatus>> + Send;

    fn create_stream(
        &self,
        stream: &str,
        shard_count: i32,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Submit up to 500 records in one call
    ///
    /// # Errors
    /// Only transport-level failures are errors; rejected records are
    /// reported per record in the outcome.
    fn put_records(
        &self,
        stream: &str,
        entries: Vec<PutEntry>,
    ) -> impl std::future::Future<Output = Result<PutOutcome>> + Send;
}

/// Make sure `stream` exists and accepts writes, creating it when missing
pub async fn ensure_stream<K: StreamClient>(client: &K, stream: &str, shard_count: i32) -> Result<()> {
    let mut status = client
        .stream_status(stream)
        .await
        .with_context(|| format!("Failed to describe stream {}", stream))?;

    if status == StreamStatus::Missing {
        log::info!(
            "Creating stream {} with {} shards",
            stream.cyan(),
            shard_count
        );
        client
            .create_stream(stream, shard_count)
            .await
            .with_context(|| format!("Failed to create stream {}", stream))?;
        status = StreamStatus::Creating;
    }

    let mut polls = 0;
    while !status.is_writable() {
        match &status {
            StreamStatus::Creating | StreamStatus::Missing => {}
            other => bail!("Stream {} is not writable: {:?}", stream, other),
        }
        if polls >= ACTIVATION_MAX_POLLS {
            bail!(
                "Stream {} did not become active after {} checks",
                stream,
                polls
            );
        }
        tokio::time::sleep(ACTIVATION_POLL_INTERVAL).await;
        polls += 1;
        status = client.stream_status(stream).await?;
        log::debug!("Stream {} is {:?}", stream, status);
    }
    Ok(())
}

struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Parses payloads into typed records and puts them in batches
pub struct KinesisSink<K> {
    table: String,
    schema: Schema,
    batch: BatchWriter<K>,
    batch_size: usize,
    skipped: u64,
    ticker: Option<Ticker>,
}

impl<K: StreamClient + 'static> KinesisSink<K> {
    /// Resolve the table's stream, create it if needed, and build the sink
    ///
    /// # Errors
    /// Returns an error if the stream cannot be described, created, or does
    /// not become active.
    pub async fn connect(
        client: Arc<K>,
        config: &KinesisConfig,
        table: &str,
        schema: Schema,
        batch_size: usize,
    ) -> Result<Self> {
        let stream = config.stream_for(table);
        ensure_stream(client.as_ref(), &stream, config.shard_count).await?;
        log::info!("Streaming {} to {}", table.cyan(), stream.cyan());

        Ok(Self {
            table: table.to_string(),
            schema,
            batch: BatchWriter::new(client, stream, config.retry),
            batch_size: batch_size.max(1),
            skipped: 0,
            ticker: None,
        })
    }

    pub fn stats(&self) -> Arc<PutStats> {
        self.batch.stats()
    }

    /// Payloads that could not be turned into records
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn start_ticker(&mut self, queue: QueueGauge) {
        let (stop, mut stopped) = oneshot::channel();
        let stats = self.batch.stats();
        let table = self.table.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = interval.tick() => {
                        log::info!(
                            "{}: {} pending, {} put, {} errors, {} queued",
                            table.cyan(),
                            stats.pending(),
                            stats.records(),
                            stats.errors(),
                            queue.depth()
                        );
                    }
                }
            }
        });
        self.ticker = Some(Ticker { stop, handle });
    }

    async fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.stop.send(());
            if let Err(e) = ticker.handle.await {
                log::debug!("Stats ticker for {} ended badly: {}", self.table, e);
            }
        }
    }
}

impl<K: StreamClient + 'static> Sink for KinesisSink<K> {
    async fn write(&mut self, payload: Vec<u8>) -> Result<()> {
        // Records are JSON, so binary values are carried lossily here only
        let payload = String::from_utf8_lossy(&payload);
        let record = parse_values(&payload)
            .and_then(|values| Record::from_values(&self.schema, &values));
        match record {
            Ok(record) => self.batch.push(record),
            Err(e) => {
                log::warn!("Skipping row of {}: {:#}: {}", self.table, e, payload);
                self.skipped += 1;
                return Ok(());
            }
        }

        if self.batch.len() >= self.batch_size {
            self.batch.put_records().await?;
        }
        Ok(())
    }

    fn observe_queue(&mut self, queue: QueueGauge) {
        self.start_ticker(queue);
    }

    async fn finish(&mut self) -> Result<()> {
        self.batch.put_records().await?;
        self.stop_ticker().await;

        let stats = self.batch.stats();
        log::info!(
            "Put {} records of {} to {} ({} retried, {} skipped)",
            stats.records(),
            self.table.cyan(),
            self.batch.stream(),
            stats.errors(),
            self.skipped
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stop_ticker().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStream {
        statuses: Mutex<Vec<StreamStatus>>,
        created: Mutex<Vec<(String, i32)>>,
        records: Mutex<Vec<PutEntry>>,
        refuse_create: bool,
    }

    impl StreamClient for MemoryStream {
        async fn stream_status(&self, _stream: &str) -> Result<StreamStatus> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.remove(0))
            } else {
                Ok(statuses.first().cloned().unwrap_or(StreamStatus::Active))
            }
        }

        async fn create_stream(&self, stream: &str, shard_count: i32) -> Result<()> {
            if self.refuse_create {
                eyre::bail!("CreateStream failed: LimitExceededException");
            }
            self.created
                .lock()
                .unwrap()
                .push((stream.to_string(), shard_count));
            Ok(())
        }

        async fn put_records(&self, _stream: &str, entries: Vec<PutEntry>) -> Result<PutOutcome> {
            let outcome = PutOutcome::new(vec![None; entries.len()]);
            self.records.lock().unwrap().extend(entries);
            Ok(outcome)
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", "int(11)", false),
            Field::new("price", "decimal(10,2)", true),
            Field::new("name", "varchar(32)", true),
        ])
    }

    #[tokio::test]
    async fn test_existing_stream_not_created() {
        let client = Arc::new(MemoryStream::default());
        let config = KinesisConfig::new("cdc-{TABLE_NAME}");

        let sink = KinesisSink::connect(client.clone(), &config, "orders", schema(), 10)
            .await
            .unwrap();

        assert!(client.created.lock().unwrap().is_empty());
        assert_eq!(sink.batch.stream(), "cdc-orders");
    }

    #[tokio::test]
    async fn test_missing_stream_created_and_awaited() {
        let client = Arc::new(MemoryStream::default());
        *client.statuses.lock().unwrap() = vec![
            StreamStatus::Missing,
            StreamStatus::Creating,
            StreamStatus::Active,
        ];
        let mut config = KinesisConfig::new("cdc");
        config.shard_count = 4;

        KinesisSink::connect(client.clone(), &config, "orders", schema(), 10)
            .await
            .unwrap();

        assert_eq!(*client.created.lock().unwrap(), vec![("cdc".to_string(), 4)]);
    }

    #[tokio::test]
    async fn test_failed_create_fails_connect() {
        let client = Arc::new(MemoryStream {
            refuse_create: true,
            ..Default::default()
        });
        *client.statuses.lock().unwrap() = vec![StreamStatus::Missing];

        let config = KinesisConfig::new("cdc");
        let result = KinesisSink::connect(client.clone(), &config, "orders", schema(), 10).await;

        let message = format!("{:#}", result.err().unwrap());
        assert!(message.contains("LimitExceededException"));
        assert!(client.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_stream_rejected() {
        let client = Arc::new(MemoryStream::default());
        *client.statuses.lock().unwrap() = vec![StreamStatus::Deleting];

        let result = ensure_stream(client.as_ref(), "cdc", 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rows_become_typed_records() {
        let client = Arc::new(MemoryStream::default());
        let config = KinesisConfig::new("cdc");
        let mut sink = KinesisSink::connect(client.clone(), &config, "orders", schema(), 2)
            .await
            .unwrap();

        sink.write("7,12.50,'it''s'".into()).await.unwrap();
        assert!(client.records.lock().unwrap().is_empty());

        sink.write("8,NULL,NULL".into()).await.unwrap();
        assert_eq!(client.records.lock().unwrap().len(), 2);

        sink.write("9,1.00,'z'".into()).await.unwrap();
        sink.finish().await.unwrap();
        sink.close().await.unwrap();

        let records = client.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].partition_key, "7");

        let first: serde_json::Value = serde_json::from_slice(&records[0].data).unwrap();
        assert_eq!(
            first,
            serde_json::json!({"deltatype": "1", "id": 7, "name": "it's", "price": 12.5})
        );
        let second: serde_json::Value = serde_json::from_slice(&records[1].data).unwrap();
        assert!(second["price"].is_null());
        assert!(second["name"].is_null());
    }

    #[tokio::test]
    async fn test_binary_values_decoded_for_records() {
        let client = Arc::new(MemoryStream::default());
        let config = KinesisConfig::new("cdc");
        let mut sink = KinesisSink::connect(client.clone(), &config, "orders", schema(), 10)
            .await
            .unwrap();

        sink.write(b"5,NULL,'a\xffb'".to_vec()).await.unwrap();
        sink.finish().await.unwrap();

        let records = client.records.lock().unwrap();
        let record: serde_json::Value = serde_json::from_slice(&records[0].data).unwrap();
        assert_eq!(record["name"], "a\u{fffd}b");
    }

    #[tokio::test]
    async fn test_unparseable_rows_skipped() {
        let client = Arc::new(MemoryStream::default());
        let config = KinesisConfig::new("cdc");
        let mut sink = KinesisSink::connect(client.clone(), &config, "orders", schema(), 10)
            .await
            .unwrap();

        sink.write("1,'unterminated".into()).await.unwrap();
        sink.write("1,2".into()).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(sink.skipped(), 2);
        assert!(client.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ticker_stops_on_finish() {
        let client = Arc::new(MemoryStream::default());
        let config = KinesisConfig::new("cdc");
        let mut sink = KinesisSink::connect(client, &config, "orders", schema(), 10)
            .await
            .unwrap();

        sink.observe_queue(QueueGauge::default());
        assert!(sink.ticker.is_some());
        sink.finish().await.unwrap();
        assert!(sink.ticker.is_none());
    }
}
