//! Inbound storage-creation events.
//!
//! The pipeline accepts the S3 bucket notification shape (also emitted by
//! MinIO webhooks). Only the bucket name and object key of each record are
//! used; everything else in the payload is ignored.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::models::key::KeyError;

/// A batch of notification records as delivered by the storage service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StorageEventRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageEventRecord {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Object {
    pub key: String,
}

/// The `(bucket, key)` pair the pipeline needs from each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub bucket: String,
    pub key: String,
}

/// A creation record whose key could not be decoded. Carries the key as
/// delivered so the failure can still be reported against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSource {
    pub bucket: String,
    pub raw_key: String,
    pub error: KeyError,
}

impl SourceRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl StorageEventRecord {
    /// Whether this record announces a newly created object.
    ///
    /// Records without an event name are treated as creations.
    pub fn is_creation(&self) -> bool {
        self.event_name
            .as_deref()
            .map(|name| name.starts_with("ObjectCreated") || name.starts_with("s3:ObjectCreated"))
            .unwrap_or(true)
    }

    pub fn source(&self) -> Result<SourceRef, RejectedSource> {
        let bucket = self.s3.bucket.name.clone();
        match decode_object_key(&self.s3.object.key) {
            Ok(key) => Ok(SourceRef::new(bucket, key)),
            Err(error) => Err(RejectedSource {
                bucket,
                raw_key: self.s3.object.key.clone(),
                error,
            }),
        }
    }
}

impl StorageEvent {
    /// Source references for every creation record, in delivery order.
    pub fn sources(&self) -> Vec<Result<SourceRef, RejectedSource>> {
        self.records
            .iter()
            .filter(|record| record.is_creation())
            .map(StorageEventRecord::source)
            .collect()
    }
}

/// Undo the form-style encoding S3 applies to keys in notifications:
/// `+` stands for a space and everything else is percent-encoded.
///
/// Escapes that do not decode to UTF-8 make the key malformed.
pub fn decode_object_key(raw: &str) -> Result<String, KeyError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| KeyError::malformed(raw, format!("key is not valid UTF-8 once decoded: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_form_encoded_keys() {
        let decode = |raw: &str| decode_object_key(raw).unwrap();
        assert_eq!(decode("u1/uploads/my+holiday%21.jpg"), "u1/uploads/my holiday!.jpg");
        assert_eq!(decode("u1/uploads/a%2Bb.png"), "u1/uploads/a+b.png");
        assert_eq!(decode("u1/uploads/caf%C3%A9.png"), "u1/uploads/café.png");
        assert_eq!(decode("u1/uploads/plain.png"), "u1/uploads/plain.png");
    }

    #[test]
    fn invalid_utf8_escapes_are_malformed() {
        let err = decode_object_key("u1/uploads/bad%FF%FE.png").unwrap_err();
        assert!(matches!(
            err,
            KeyError::Malformed { ref key, .. } if key == "u1/uploads/bad%FF%FE.png"
        ));
    }

    #[test]
    fn parses_s3_notification_and_skips_non_creations() {
        let payload = r#"{
            "Records": [
                {
                    "eventName": "ObjectCreated:Put",
                    "s3": {
                        "bucket": { "name": "photos" },
                        "object": { "key": "u123/uploads/photo.png", "size": 1024 }
                    }
                },
                {
                    "eventName": "ObjectRemoved:Delete",
                    "s3": {
                        "bucket": { "name": "photos" },
                        "object": { "key": "u123/uploads/old.png" }
                    }
                },
                {
                    "s3": {
                        "bucket": { "name": "photos" },
                        "object": { "key": "u9/uploads/x+y.gif" }
                    }
                }
            ]
        }"#;

        let event: StorageEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(
            event.sources(),
            vec![
                Ok(SourceRef::new("photos", "u123/uploads/photo.png")),
                Ok(SourceRef::new("photos", "u9/uploads/x y.gif")),
            ]
        );
    }

    #[test]
    fn missing_records_is_an_empty_batch() {
        let event: StorageEvent = serde_json::from_str("{}").unwrap();
        assert!(event.sources().is_empty());
    }
}
