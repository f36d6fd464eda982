//! Derivative pipeline - turns storage-creation events into resized copies
//!
//! For each record: parse the tenant-scoped key, fetch the original, shrink
//! it, store the result under `{tenant}/resized/{filename}` and publish the
//! outcome. Records are independent; a failing record never affects the
//! others in its batch.

use futures::{StreamExt, stream};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::ProcessingError;
use crate::models::event::{RejectedSource, SourceRef, StorageEvent};
use crate::models::key::ObjectKey;
use crate::models::outcome::{BatchResult, ProcessingEvent, RecordOutcome, RecordReport};
use crate::services::notifier::Notifier;
use crate::services::object_store::ObjectStore;
use crate::services::retry::RetryPolicy;
use crate::services::transformer::ImageTransformer;

/// Settings resolved once at startup.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bucket receiving derivatives; `None` writes back to the source bucket.
    pub destination_bucket: Option<String>,
    /// Topic that outcome notifications are published to.
    pub topic: String,
    /// Records of one batch processed concurrently.
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            destination_bucket: None,
            topic: "image-processing".to_string(),
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    transformer: Arc<ImageTransformer>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

/// Where a record's derivative goes.
struct Target {
    source: ObjectKey,
    bucket: String,
    key: String,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transformer: Arc<ImageTransformer>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            transformer,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Process every creation record of a delivered event.
    ///
    /// Records whose key cannot be decoded are reported as malformed
    /// alongside the rest of the batch.
    pub async fn process_event(&self, event: &StorageEvent) -> BatchResult {
        let sources = event.sources();
        let skipped = event.records.len() - sources.len();
        if skipped > 0 {
            debug!(skipped, "ignoring non-creation records");
        }
        self.run(sources).await
    }

    /// Process a batch of records with bounded concurrency.
    ///
    /// Results come back in input order, one report per record.
    pub async fn process(&self, sources: Vec<SourceRef>) -> BatchResult {
        self.run(sources.into_iter().map(Ok).collect()).await
    }

    async fn run(&self, inputs: Vec<Result<SourceRef, RejectedSource>>) -> BatchResult {
        let total = inputs.len();
        let records: Vec<RecordReport> = stream::iter(inputs)
            .map(|input| async move {
                match input {
                    Ok(source) => self.process_record(source).await,
                    Err(rejected) => {
                        rejected_report(rejected.bucket, rejected.raw_key, rejected.error.into())
                    }
                }
            })
            .buffered(self.config.workers.max(1))
            .collect()
            .await;

        let result = BatchResult { records };
        info!(
            total,
            succeeded = result.succeeded(),
            failed = result.failed(),
            notification_failures = result.notification_failures(),
            "batch processed"
        );
        result
    }

    /// Process a single record to completion. Never fails: every error ends
    /// up in the returned report.
    pub async fn process_record(&self, source: SourceRef) -> RecordReport {
        let target = match self.resolve(&source) {
            Ok(target) => target,
            Err(err) => return rejected_report(source.bucket, source.key, err),
        };

        let (outcome, event) = match self.derive(&source, &target).await {
            Ok(()) => {
                info!(
                    bucket = %source.bucket,
                    key = %source.key,
                    destination = %format!("{}/{}", target.bucket, target.key),
                    "derivative stored"
                );
                (
                    RecordOutcome::Succeeded {
                        destination_bucket: target.bucket.clone(),
                        destination_key: target.key.clone(),
                    },
                    ProcessingEvent::success(&source.key, &target.bucket, &target.key),
                )
            }
            Err(err) => {
                let kind = err.kind();
                warn!(bucket = %source.bucket, key = %source.key, kind = %kind, error = %err, "record failed");
                let message = err.to_string();
                let event = ProcessingEvent::failure(&source.key, &target.key, kind, &message);
                (RecordOutcome::Failed { kind, message }, event)
            }
        };

        let notification_error = match self.notifier.publish(&self.config.topic, &event).await {
            Ok(()) => None,
            Err(err) => {
                warn!(key = %source.key, error = %err, "notification failed");
                Some(err.to_string())
            }
        };

        RecordReport {
            bucket: source.bucket,
            key: source.key,
            outcome,
            notification_error,
        }
    }

    /// Parse the source key and work out the destination. Pure; no I/O.
    fn resolve(&self, source: &SourceRef) -> Result<Target, ProcessingError> {
        let key = ObjectKey::parse(&source.key)?;
        let derived = key.derived()?;
        let bucket = self
            .config
            .destination_bucket
            .clone()
            .unwrap_or_else(|| source.bucket.clone());
        Ok(Target {
            source: key,
            bucket,
            key: derived.to_string(),
        })
    }

    /// fetch → transform → store, strictly in sequence.
    async fn derive(&self, source: &SourceRef, target: &Target) -> Result<(), ProcessingError> {
        let retry = &self.config.retry;

        let object = retry
            .run("fetch", || self.store.fetch(&source.bucket, &source.key))
            .await?;
        let source_content_type = object.content_type.clone();

        let derivative = Arc::clone(&self.transformer)
            .resize_async(object.bytes, target.source.extension())
            .await?;

        // pass-through copies keep the content type they were uploaded with
        let content_type = match (derivative.resized, source_content_type) {
            (false, Some(declared)) => declared,
            _ => derivative.content_type().to_string(),
        };

        retry
            .run("store", || {
                self.store.store(
                    &target.bucket,
                    &target.key,
                    derivative.bytes.clone(),
                    &content_type,
                )
            })
            .await?;

        debug!(
            width = derivative.width,
            height = derivative.height,
            resized = derivative.resized,
            "derivative written"
        );
        Ok(())
    }
}

/// Report for a record refused before any I/O. There is no valid
/// destination to name, so nothing is published for it.
fn rejected_report(bucket: String, key: String, err: ProcessingError) -> RecordReport {
    warn!(bucket = %bucket, key = %key, error = %err, "skipping record");
    RecordReport {
        outcome: RecordOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        },
        bucket,
        key,
        notification_error: None,
    }
}
