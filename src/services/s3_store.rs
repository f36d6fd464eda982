//! S3-compatible object store backed by `aws-sdk-s3`.
//!
//! Works against AWS S3 and against S3-compatible services such as MinIO when
//! an endpoint override is configured.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Region, http::HttpResponse},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
};
use bytes::Bytes;
use tracing::debug;

use crate::models::object::StoredObject;
use crate::services::object_store::{ObjectStore, StoreError, StoreResult};

/// Connection settings for the S3 backend.
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub region: Option<String>,
    /// Custom endpoint, e.g. `http://localhost:9000` for MinIO.
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential chain plus `settings`.
    ///
    /// Path-style addressing is enabled whenever a custom endpoint is set,
    /// since most self-hosted services do not serve virtual-host buckets.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = settings.endpoint.as_deref().map(str::trim) {
            if !endpoint.is_empty() {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }
        }

        Self::new(Client::from_conf(builder.build()))
    }
}

/// Classify a failed S3 call.
fn classify<E>(bucket: &str, key: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(ctx) => classify_service(
            bucket,
            key,
            ctx.err().code(),
            ctx.raw().status().as_u16(),
            detail,
        ),
        SdkError::ConstructionFailure(_) => StoreError::invalid_request(bucket, key, detail),
        _ => StoreError::transient(bucket, key, detail),
    }
}

/// Map a service error code and HTTP status onto the store taxonomy.
fn classify_service(
    bucket: &str,
    key: &str,
    code: Option<&str>,
    status: u16,
    detail: String,
) -> StoreError {
    match code {
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket") => return StoreError::not_found(bucket, key),
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "AllAccessDisabled") => {
            return StoreError::access_denied(bucket, key, detail);
        }
        Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable") => {
            return StoreError::transient(bucket, key, detail);
        }
        _ => {}
    }

    match status {
        404 => StoreError::not_found(bucket, key),
        401 | 403 => StoreError::access_denied(bucket, key, detail),
        408 | 429 | 500..=599 => StoreError::transient(bucket, key, detail),
        _ => StoreError::invalid_request(bucket, key, detail),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn fetch(&self, bucket: &str, key: &str) -> StoreResult<StoredObject> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(bucket, key, err))?;

        let content_type = output.content_type().map(str::to_string);
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::transient(bucket, key, err.to_string()))?
            .into_bytes();

        debug!(bucket, key, size = body.len(), "downloaded object");
        Ok(StoredObject::new(body, content_type))
    }

    async fn store(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| classify(bucket, key, err))?;

        debug!(bucket, key, size, "uploaded object");
        Ok(())
    }
}
