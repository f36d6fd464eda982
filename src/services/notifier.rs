//! Outcome notifications.
//!
//! Every processed record publishes one [`ProcessingEvent`] to a topic.
//! Publishing is best-effort: callers log failures and carry on.

use async_trait::async_trait;
use aws_sdk_sns::{Client as SnsClient, error::DisplayErrorContext};
#[cfg(test)]
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use crate::models::outcome::ProcessingEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("failed to publish to `{topic}`: {reason}")]
    Transient { topic: String, reason: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, event: &ProcessingEvent) -> Result<(), NotifyError>;
}

/// Publishes events as JSON messages to an SNS topic.
#[derive(Clone)]
pub struct SnsNotifier {
    client: SnsClient,
}

impl SnsNotifier {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }

    pub async fn connect(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_sns::config::Region::new(region));
        }
        let config = loader.load().await;
        Self::new(SnsClient::new(&config))
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, topic: &str, event: &ProcessingEvent) -> Result<(), NotifyError> {
        let message = serde_json::to_string(event).map_err(|e| NotifyError::Transient {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        let output = self
            .client
            .publish()
            .topic_arn(topic)
            .subject(event.subject())
            .message(message)
            .send()
            .await
            .map_err(|e| NotifyError::Transient {
                topic: topic.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(
            topic,
            message_id = output.message_id().unwrap_or_default(),
            "published processing event"
        );
        Ok(())
    }
}

/// Writes events to the log instead of a message bus.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, topic: &str, event: &ProcessingEvent) -> Result<(), NotifyError> {
        info!(
            topic,
            source_key = %event.source_key,
            destination_key = %event.destination_key,
            status = ?event.status,
            detail = %event.detail,
            "processing event"
        );
        Ok(())
    }
}

/// Records published events in memory; optionally refuses to publish.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryNotifier {
    published: Mutex<Vec<(String, ProcessingEvent)>>,
    failing: bool,
}

#[cfg(test)]
impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every publish fails.
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn published(&self) -> Vec<(String, ProcessingEvent)> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events(&self) -> Vec<ProcessingEvent> {
        self.published().into_iter().map(|(_, event)| event).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, topic: &str, event: &ProcessingEvent) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError::Transient {
                topic: topic.to_string(),
                reason: "topic unavailable".to_string(),
            });
        }
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::outcome::EventStatus;

    #[tokio::test]
    async fn memory_notifier_records_topic_and_event() {
        let notifier = MemoryNotifier::new();
        let event = ProcessingEvent::success("u/uploads/a.png", "photos", "u/resized/a.png");
        notifier.publish("image-events", &event).await.unwrap();

        let published = notifier.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "image-events");
        assert_eq!(published[0].1.status, EventStatus::Success);
    }

    #[tokio::test]
    async fn failing_notifier_reports_topic() {
        let notifier = MemoryNotifier::failing();
        let event = ProcessingEvent::success("u/uploads/a.png", "photos", "u/resized/a.png");
        let err = notifier.publish("image-events", &event).await.unwrap_err();
        assert!(err.to_string().contains("image-events"));
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn log_notifier_always_acks() {
        let event = ProcessingEvent::success("u/uploads/a.png", "photos", "u/resized/a.png");
        LogNotifier.publish("log", &event).await.unwrap();
    }
}
