//! Tenant-scoped object keys.
//!
//! Every object the pipeline touches is addressed as
//! `{tenant_id}/{namespace}/{filename}`. Originals live under the `uploads`
//! namespace, derivatives under `resized`, both inside the tenant's prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Namespace holding the originals written by the upload path.
pub const UPLOADS: &str = "uploads";

/// Namespace holding the derivatives written by this pipeline.
pub const RESIZED: &str = "resized";

const MIN_SEGMENTS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed key `{key}`: {reason}")]
    Malformed { key: String, reason: String },
}

impl KeyError {
    pub fn malformed(key: &str, reason: impl Into<String>) -> Self {
        KeyError::Malformed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// A key split into its tenant, namespace and filename components.
///
/// The namespace may itself contain `/` when the key has more than three
/// segments; the tenant is always the first segment and the filename always
/// the last.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub tenant_id: String,
    pub namespace: String,
    pub filename: String,
}

impl ObjectKey {
    /// Split `key` into its components.
    ///
    /// Rejects keys with fewer than three segments and keys whose tenant or
    /// filename segment is empty.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() < MIN_SEGMENTS {
            return Err(KeyError::malformed(
                key,
                format!(
                    "expected at least {} `/`-delimited segments, found {}",
                    MIN_SEGMENTS,
                    segments.len()
                ),
            ));
        }

        let tenant_id = segments[0];
        let filename = segments[segments.len() - 1];
        if tenant_id.is_empty() {
            return Err(KeyError::malformed(key, "tenant id is empty"));
        }
        if filename.is_empty() {
            return Err(KeyError::malformed(key, "filename is empty"));
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            namespace: segments[1..segments.len() - 1].join("/"),
            filename: filename.to_string(),
        })
    }

    /// The key of the derivative produced from this source key.
    ///
    /// Only namespaces rooted at `uploads` have a derivative. The leading
    /// `uploads` segment becomes `resized` and any sub-path below it is kept,
    /// so `u1/uploads/2024/cat.png` maps to `u1/resized/2024/cat.png`.
    /// Anything else (notably the pipeline's own `resized` output) is refused
    /// so a shared source and destination bucket cannot feed the pipeline its
    /// own writes.
    pub fn derived(&self) -> Result<Self, KeyError> {
        let sub_path = self
            .namespace
            .strip_prefix(UPLOADS)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'));
        match sub_path {
            Some(rest) => Ok(self.with_namespace(format!("{}{}", RESIZED, rest))),
            None => Err(KeyError::malformed(
                &self.to_string(),
                format!(
                    "namespace `{}` is not under `{}`",
                    self.namespace, UPLOADS
                ),
            )),
        }
    }

    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            namespace: namespace.into(),
            filename: self.filename.clone(),
        }
    }

    /// Lowercased filename extension, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.filename.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Join the components back into `{tenant_id}/{namespace}/{filename}`.
pub fn format_key(tenant_id: &str, namespace: &str, filename: &str) -> String {
    format!("{}/{}/{}", tenant_id, namespace, filename)
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_key(&self.tenant_id, &self.namespace, &self.filename))
    }
}
