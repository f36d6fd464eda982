//! Results of processing records: per-record outcomes, batch results and
//! the notification message published for each attempt.

use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failure,
}

/// Message published to the notification topic once per processed record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProcessingEvent {
    pub source_key: String,
    pub destination_key: String,
    pub status: EventStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProcessingEvent {
    pub fn success(source_key: &str, destination_bucket: &str, destination_key: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
            status: EventStatus::Success,
            detail: format!(
                "Image {} has been resized and uploaded to {}/{}.",
                source_key, destination_bucket, destination_key
            ),
            error_kind: None,
        }
    }

    pub fn failure(source_key: &str, destination_key: &str, kind: ErrorKind, message: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
            status: EventStatus::Failure,
            detail: format!("{}: {}", kind, message),
            error_kind: Some(kind),
        }
    }

    /// Subject line used by transports that support one.
    pub fn subject(&self) -> &'static str {
        match self.status {
            EventStatus::Success => "Image Processed Successfully",
            EventStatus::Failure => "Image Processing Failed",
        }
    }
}

/// Terminal state of one record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Succeeded {
        destination_bucket: String,
        destination_key: String,
    },
    Failed { kind: ErrorKind, message: String },
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecordOutcome::Succeeded { .. })
    }

    #[cfg(test)]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RecordOutcome::Succeeded { .. } => None,
            RecordOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Everything known about one record after processing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RecordReport {
    pub bucket: String,
    pub key: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
    /// Failure to publish the outcome notification, if any. Never affects
    /// `outcome`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// Per-record results for one delivered batch, in input order.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BatchResult {
    pub records: Vec<RecordReport>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }

    pub fn notification_failures(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.notification_error.is_some())
            .count()
    }

    #[cfg(test)]
    pub fn failures_of(&self, kind: ErrorKind) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.error_kind() == Some(kind))
            .count()
    }
}
