//! Destinations for exported rows
//!
//! Three sinks implement [`Sink`]:
//! - [`CsvSink`]: a local `<table>.csv`
//! - [`S3Sink`]: the CSV sink, gzipped and uploaded with schema artifacts
//! - [`KinesisSink`]: typed JSON records put to a stream in batches
//!
//! [`Destinations`] picks one per table from the configured [`SinkType`].

mod batch;
mod csv;
mod kinesis;
mod s3;

pub use batch::{BatchWriter, MAX_RECORDS_PER_PUT, PutStats};
pub use csv::CsvSink;
pub use kinesis::{
    ACTIVATION_MAX_POLLS, ACTIVATION_POLL_INTERVAL, KinesisSink, PutEntry, PutOutcome,
    STATS_INTERVAL, StreamClient, StreamStatus, ensure_stream,
};
pub use s3::S3Sink;

use crate::config::{ConnectionConfig, SinkType};
use crate::etl::{QueueGauge, Sink, SinkFactory};
use crate::schema::Catalog;
use crate::storage::{ObjectUploader, S3Layout};
use crate::tables::Table;
use eyre::{Context, Result, eyre};
use std::sync::Arc;

/// One of the three sinks
pub enum AnySink<C, U, K> {
    Csv(CsvSink),
    S3(S3Sink<U, C>),
    Kinesis(KinesisSink<K>),
}

impl<C, U, K> Sink for AnySink<C, U, K>
where
    C: Catalog + 'static,
    U: ObjectUploader + 'static,
    K: StreamClient + 'static,
{
    async fn write(&mut self, payload: Vec<u8>) -> Result<()> {
        match self {
            Self::Csv(sink) => sink.write(payload).await,
            Self::S3(sink) => sink.write(payload).await,
            Self::Kinesis(sink) => sink.write(payload).await,
        }
    }

    fn observe_queue(&mut self, queue: QueueGauge) {
        match self {
            Self::Csv(sink) => sink.observe_queue(queue),
            Self::S3(sink) => sink.observe_queue(queue),
            Self::Kinesis(sink) => sink.observe_queue(queue),
        }
    }

    async fn finish(&mut self) -> Result<()> {
        match self {
            Self::Csv(sink) => sink.finish().await,
            Self::S3(sink) => sink.finish().await,
            Self::Kinesis(sink) => sink.finish().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Csv(sink) => sink.close().await,
            Self::S3(sink) => sink.close().await,
            Self::Kinesis(sink) => sink.close().await,
        }
    }
}

/// Opens the configured sink for each table
///
/// The S3 uploader and stream client are only required when the matching
/// sink type is selected.
pub struct Destinations<C, U, K> {
    conn: Arc<ConnectionConfig>,
    catalog: Arc<C>,
    uploader: Option<Arc<U>>,
    streams: Option<Arc<K>>,
}

impl<C, U, K> Destinations<C, U, K> {
    pub fn new(conn: Arc<ConnectionConfig>, catalog: Arc<C>) -> Self {
        Self {
            conn,
            catalog,
            uploader: None,
            streams: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<U>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_streams(mut self, streams: Arc<K>) -> Self {
        self.streams = Some(streams);
        self
    }
}

impl<C, U, K> Destinations<C, U, K>
where
    C: Catalog + 'static,
    U: ObjectUploader + 'static,
    K: StreamClient + 'static,
{
    async fn open_s3(&self, table: &Table) -> Result<S3Sink<U, C>> {
        let s3 = self
            .conn
            .s3
            .as_ref()
            .ok_or_else(|| eyre!("S3 settings are missing"))?;
        let uploader = self
            .uploader
            .clone()
            .ok_or_else(|| eyre!("No S3 client configured"))?;

        let csv = CsvSink::create(table.csv_path(), self.conn.buffer_size).await?;
        Ok(S3Sink::new(
            csv,
            &table.name,
            S3Layout::today(&s3.prefix),
            &table.destination,
            uploader,
            Arc::clone(&self.catalog),
        ))
    }

    async fn open_kinesis(&self, table: &Table) -> Result<KinesisSink<K>> {
        let config = self
            .conn
            .kinesis
            .as_ref()
            .ok_or_else(|| eyre!("Kinesis settings are missing"))?;
        let client = self
            .streams
            .clone()
            .ok_or_else(|| eyre!("No Kinesis client configured"))?;

        let schema = self
            .catalog
            .schema(&table.name)
            .await
            .with_context(|| format!("Failed to fetch the schema of {}", table.name))?;
        KinesisSink::connect(client, config, &table.name, schema, self.conn.batch_size).await
    }
}

impl<C, U, K> SinkFactory for Destinations<C, U, K>
where
    C: Catalog + 'static,
    U: ObjectUploader + 'static,
    K: StreamClient + 'static,
{
    type Sink = AnySink<C, U, K>;

    async fn open(&self, table: &Table) -> Result<Self::Sink> {
        match self.conn.sink {
            SinkType::Csv => Ok(AnySink::Csv(
                CsvSink::create(table.csv_path(), self.conn.buffer_size).await?,
            )),
            SinkType::S3 => Ok(AnySink::S3(self.open_s3(table).await?)),
            SinkType::Kinesis => Ok(AnySink::Kinesis(self.open_kinesis(table).await?)),
        }
    }
}
