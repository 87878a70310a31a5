//! AWS clients for the S3 and Kinesis sinks

use crate::config::{AwsConfig, KinesisConfig};
use crate::sink::{PutEntry, PutOutcome, StreamClient, StreamStatus};
use crate::storage::{ChunkReceiver, ObjectUploader};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::{PutRecordsRequestEntry, StreamStatus as SdkStreamStatus};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use eyre::{Result, eyre};

/// Size of each multipart upload part, 8 MiB
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Load the shared SDK configuration for the configured region
pub async fn load_sdk_config(aws: &AwsConfig) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(aws.region.clone()))
        .load()
        .await
}

fn sdk_error<E>(context: &str, error: E) -> eyre::Report
where
    E: std::error::Error + Send + Sync + 'static,
{
    eyre!("{}: {}", context, DisplayErrorContext(error))
}

/// Kinesis [`StreamClient`]
#[derive(Debug, Clone)]
pub struct KinesisClient {
    client: aws_sdk_kinesis::Client,
}

impl KinesisClient {
    pub fn new(sdk: &SdkConfig, config: &KinesisConfig) -> Self {
        let mut builder = aws_sdk_kinesis::config::Builder::from(sdk);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.as_str());
        }
        Self {
            client: aws_sdk_kinesis::Client::from_conf(builder.build()),
        }
    }
}

impl StreamClient for KinesisClient {
    async fn stream_status(&self, stream: &str) -> Result<StreamStatus> {
        let output = match self
            .client
            .describe_stream_summary()
            .stream_name(stream)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                return Ok(StreamStatus::Missing);
            }
            Err(e) => return Err(sdk_error("DescribeStreamSummary failed", e)),
        };

        let status = output
            .stream_description_summary()
            .map(|summary| summary.stream_status().clone())
            .ok_or_else(|| eyre!("No stream summary returned for {}", stream))?;

        Ok(match status {
            SdkStreamStatus::Active => StreamStatus::Active,
            SdkStreamStatus::Creating => StreamStatus::Creating,
            SdkStreamStatus::Deleting => StreamStatus::Deleting,
            SdkStreamStatus::Updating => StreamStatus::Updating,
            other => StreamStatus::Other(other.as_str().to_string()),
        })
    }

    async fn create_stream(&self, stream: &str, shard_count: i32) -> Result<()> {
        self.client
            .create_stream()
            .stream_name(stream)
            .shard_count(shard_count)
            .send()
            .await
            .map_err(|e| sdk_error("CreateStream failed", e))?;
        Ok(())
    }

    async fn put_records(&self, stream: &str, entries: Vec<PutEntry>) -> Result<PutOutcome> {
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            records.push(
                PutRecordsRequestEntry::builder()
                    .partition_key(entry.partition_key)
                    .data(Blob::new(entry.data))
                    .build()?,
            );
        }

        let response = self
            .client
            .put_records()
            .stream_name(stream)
            .set_records(Some(records))
            .send()
            .await
            .map_err(|e| sdk_error("PutRecords failed", e))?;

        Ok(PutOutcome {
            failed_record_count: response.failed_record_count().unwrap_or(0).max(0) as usize,
            errors: response
                .records()
                .iter()
                .map(|record| record.error_code().map(str::to_string))
                .collect(),
        })
    }
}

/// S3 [`ObjectUploader`] for one bucket
#[derive(Debug, Clone)]
pub struct S3Uploader {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Uploader {
    pub fn new(sdk: &SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(sdk),
            bucket: bucket.into(),
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        chunks: &mut ChunkReceiver,
    ) -> Result<u64> {
        let mut completed = Vec::new();
        let mut total = 0u64;
        let mut part = first;
        let mut number = 1;
        let mut eof = false;

        loop {
            if !part.is_empty() {
                total += part.len() as u64;
                let uploaded = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(number)
                    .body(ByteStream::from(std::mem::take(&mut part)))
                    .send()
                    .await
                    .map_err(|e| sdk_error("UploadPart failed", e))?;
                completed.push(
                    CompletedPart::builder()
                        .set_e_tag(uploaded.e_tag().map(str::to_string))
                        .part_number(number)
                        .build(),
                );
                log::debug!("Uploaded part {} of {}", number, key);
                number += 1;
            }
            if eof {
                break;
            }
            part = Vec::with_capacity(PART_SIZE);
            eof = fill_part(chunks, &mut part).await?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("CompleteMultipartUpload failed", e))?;
        Ok(total)
    }
}

/// Read chunks into `part` until it holds a full part; true once the pipe is drained
async fn fill_part(chunks: &mut ChunkReceiver, part: &mut Vec<u8>) -> Result<bool> {
    while part.len() < PART_SIZE {
        match chunks.recv().await {
            Some(chunk) => part.extend(chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

impl ObjectUploader for S3Uploader {
    async fn upload_stream(&self, key: &str, mut chunks: ChunkReceiver) -> Result<u64> {
        let mut first = Vec::with_capacity(PART_SIZE);
        if fill_part(&mut chunks, &mut first).await? {
            let len = first.len() as u64;
            self.put_object(key, first).await?;
            return Ok(len);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .send()
            .await
            .map_err(|e| sdk_error("CreateMultipartUpload failed", e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| eyre!("No upload id returned for {}", key))?
            .to_string();

        match self.upload_parts(key, &upload_id, first, &mut chunks).await {
            Ok(total) => Ok(total),
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    log::warn!(
                        "Could not abort the upload of {}: {}",
                        key,
                        DisplayErrorContext(abort)
                    );
                }
                Err(e)
            }
        }
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject failed", e))?;
        Ok(())
    }
}
