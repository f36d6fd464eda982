//! Represents an object (blob) fetched from or written to a bucket.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An object payload together with its declared content type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl StoredObject {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }
}

/// Metadata persisted next to an object payload by the local store.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectMetadata {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5 checksum of the payload, hex encoded.
    pub etag: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}
