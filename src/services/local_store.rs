//! src/services/local_store.rs
//!
//! LocalObjectStore: object payloads on local disk, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`, with a JSON metadata sidecar
//! per object under `base_path/{bucket}/.meta/{shard}/{shard}/{key}.json`.
//! Used for development and single-node deployments without S3.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use crate::models::object::{ObjectMetadata, StoredObject};
use crate::services::object_store::{ObjectStore, StoreError, StoreResult};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const META_DIR: &str = ".meta";

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/` or contain `..`.
    fn ensure_key_safe(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let reject = |reason: &str| Err(StoreError::invalid_request(bucket, key, reason));
        if key.is_empty() {
            return reject("key is empty");
        }
        if key.len() > MAX_OBJECT_KEY_LEN {
            return reject("key is too long");
        }
        if key.starts_with('/') || key.contains("..") {
            return reject("key must be relative and must not contain `..`");
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return reject("key contains control characters or backslashes");
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str, key: &str) -> StoreResult<()> {
        let reject = |reason: &str| Err(StoreError::invalid_request(name, key, reason));

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return reject("bucket name must be between 3 and 63 characters");
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return reject(
                "bucket name may only contain lowercase letters, digits, dots, and hyphens",
            );
        }

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
        {
            return reject("bucket name must start and end with a lowercase letter or digit");
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return reject("bucket name cannot contain consecutive dots or dot-hyphen combinations");
        }

        if is_ipv4_like(name) {
            return reject("bucket name must not be formatted like an IP address");
        }

        Ok(())
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn metadata_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(META_DIR);
        path.push(shard_a);
        path.push(shard_b);
        path.push(format!("{}.json", key));
        path
    }

    fn validate(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_bucket_name_safe(bucket, key)?;
        self.ensure_key_safe(bucket, key)
    }

    /// Write `bytes` to `path` through a temp file in the same directory,
    /// fsync it, then rename into place so readers never see partial data.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            if let Err(err) = fs::rename(&tmp_path, path).await {
                if err.kind() == ErrorKind::AlreadyExists {
                    fs::remove_file(path).await?;
                    fs::rename(&tmp_path, path).await?;
                } else {
                    return Err(err);
                }
            }
            Ok::<(), io::Error>(())
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn read_metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        let path = self.metadata_path(bucket, key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!("failed to read metadata {}: {}", path.display(), err);
                }
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(meta) => Some(meta),
            Err(err) => {
                debug!("ignoring unreadable metadata {}: {}", path.display(), err);
                None
            }
        }
    }
}

/// Map an I/O failure onto the store taxonomy.
///
/// Missing files mean the object does not exist, permission problems are
/// permanent, and everything else is treated as retryable.
fn classify_io(bucket: &str, key: &str, err: io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::not_found(bucket, key),
        ErrorKind::PermissionDenied => StoreError::access_denied(bucket, key, err.to_string()),
        _ => StoreError::transient(bucket, key, err.to_string()),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, bucket: &str, key: &str) -> StoreResult<StoredObject> {
        self.validate(bucket, key)?;

        let file_path = self.object_path(bucket, key);
        let bytes = fs::read(&file_path)
            .await
            .map_err(|err| classify_io(bucket, key, err))?;
        let content_type = self
            .read_metadata(bucket, key)
            .await
            .and_then(|meta| meta.content_type);

        debug!(bucket, key, size = bytes.len(), "read object from disk");
        Ok(StoredObject::new(bytes, content_type))
    }

    async fn store(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        self.validate(bucket, key)?;

        let file_path = self.object_path(bucket, key);
        Self::write_atomic(&file_path, &bytes)
            .await
            .map_err(|err| classify_io(bucket, key, err))?;

        let meta = ObjectMetadata {
            key: key.to_string(),
            content_type: Some(content_type.to_string()),
            size_bytes: bytes.len() as u64,
            etag: format!("{:x}", md5::compute(&bytes)),
            last_modified: Utc::now(),
        };
        let encoded = serde_json::to_vec(&meta)
            .map_err(|err| StoreError::invalid_request(bucket, key, err.to_string()))?;
        Self::write_atomic(&self.metadata_path(bucket, key), &encoded)
            .await
            .map_err(|err| classify_io(bucket, key, err))?;

        debug!(bucket, key, etag = %meta.etag, "wrote object to disk");
        Ok(())
    }

    /// Best-effort write/read/delete round trip under `base_path`.
    async fn probe(&self) -> StoreResult<()> {
        let probe_key = format!(".readyz-{}", Uuid::new_v4());
        let tmp_path = self.base_path.join(&probe_key);
        let fail = |reason: String| StoreError::transient("-", &probe_key, reason);

        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| fail(format!("could not create base path: {}", e)))?;
        fs::write(&tmp_path, b"readyz")
            .await
            .map_err(|e| fail(format!("could not write tmp file: {}", e)))?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match read_back {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err(fail("file content mismatch".to_string())),
            Err(e) => Err(fail(format!("could not read tmp file: {}", e))),
        }
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts
        .iter()
        .all(|segment| !segment.is_empty() && segment.len() <= 3 && segment.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind as FailureKind;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn stores_and_fetches_with_content_type() {
        let (_dir, store) = store();
        store
            .store("photos", "u1/resized/a.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();

        let object = store.fetch("photos", "u1/resized/a.png").await.unwrap();
        assert_eq!(object.bytes, Bytes::from_static(b"png"));
        assert_eq!(object.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn overwrite_replaces_payload() {
        let (_dir, store) = store();
        for body in [&b"first"[..], &b"second"[..]] {
            store
                .store("photos", "u1/resized/a.jpg", Bytes::copy_from_slice(body), "image/jpeg")
                .await
                .unwrap();
        }
        let object = store.fetch("photos", "u1/resized/a.jpg").await.unwrap();
        assert_eq!(object.bytes, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, store) = store();
        let err = store.fetch("photos", "u1/uploads/missing.png").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn unsafe_keys_and_buckets_are_rejected_before_io() {
        let (_dir, store) = store();
        for (bucket, key) in [
            ("photos", "../escape.png"),
            ("photos", "/abs/path.png"),
            ("Photos", "u1/uploads/a.png"),
            ("192.168.1.1", "u1/uploads/a.png"),
            ("ab", "u1/uploads/a.png"),
        ] {
            let err = store.fetch(bucket, key).await.unwrap_err();
            assert_eq!(err.kind(), FailureKind::InvalidRequest, "{bucket}/{key}");
        }
    }

    #[tokio::test]
    async fn objects_are_sharded_under_bucket_root() {
        let (dir, store) = store();
        store
            .store("photos", "u1/resized/a.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();
        let path = store.object_path("photos", "u1/resized/a.png");
        assert!(path.starts_with(dir.path().join("photos")));
        assert!(path.exists());
        assert!(store.metadata_path("photos", "u1/resized/a.png").exists());
    }

    #[tokio::test]
    async fn probe_succeeds_on_writable_dir() {
        let (_dir, store) = store();
        store.probe().await.unwrap();
    }

    #[test]
    fn detects_ipv4_like_names() {
        assert!(is_ipv4_like("10.0.0.1"));
        assert!(!is_ipv4_like("10.0.0"));
        assert!(!is_ipv4_like("my.bucket.name.here"));
        assert!(!is_ipv4_like("300.1.1.1"));
    }

    #[test]
    fn io_errors_map_onto_store_kinds() {
        let kind = |err: io::ErrorKind| classify_io("photos", "u1/uploads/a.png", err.into()).kind();
        assert_eq!(kind(ErrorKind::PermissionDenied), FailureKind::AccessDenied);
        assert_eq!(kind(ErrorKind::NotFound), FailureKind::NotFound);
        assert_eq!(kind(ErrorKind::TimedOut), FailureKind::TransientIo);
        assert!(!FailureKind::AccessDenied.is_transient());
    }
}
