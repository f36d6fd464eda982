use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::services::pipeline::PipelineConfig;
use crate::services::retry::RetryPolicy;
use crate::services::s3_store::S3Settings;
use crate::services::transformer::TransformConfig;

const ENV_PREFIX: &str = "RESIZER_";

/// Where objects are read from and written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Sharded directory tree under `storage_dir`.
    Local,
    /// AWS S3 or an S3-compatible endpoint.
    S3,
    /// Process memory; contents are lost on exit.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend `{}` (expected local, s3 or memory)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StorageBackend,
    pub storage_dir: String,
    pub s3_endpoint: Option<String>,
    pub region: Option<String>,
    pub dest_bucket: Option<String>,
    pub topic: Option<String>,
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
    pub jpeg_quality: u8,
    pub workers: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Tenant-scoped image derivative pipeline")]
pub struct Args {
    /// Host to bind to (overrides RESIZER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RESIZER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object storage backend (overrides RESIZER_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StorageBackend>,

    /// Directory for the local backend (overrides RESIZER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Custom S3 endpoint, e.g. a MinIO URL (overrides RESIZER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// AWS region (overrides RESIZER_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Bucket for derivatives; defaults to the source bucket (overrides RESIZER_DEST_BUCKET)
    #[arg(long)]
    pub dest_bucket: Option<String>,

    /// SNS topic ARN for outcome notifications (overrides RESIZER_TOPIC)
    #[arg(long)]
    pub topic: Option<String>,

    /// Maximum derivative width (overrides RESIZER_MAX_WIDTH)
    #[arg(long)]
    pub max_width: Option<u32>,

    /// Maximum derivative height (overrides RESIZER_MAX_HEIGHT)
    #[arg(long)]
    pub max_height: Option<u32>,

    /// Largest source image accepted, in pixels (overrides RESIZER_MAX_PIXELS)
    #[arg(long)]
    pub max_pixels: Option<u64>,

    /// JPEG quality 1-100 (overrides RESIZER_JPEG_QUALITY)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Records processed concurrently per batch (overrides RESIZER_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Attempts per storage call before giving up (overrides RESIZER_RETRY_ATTEMPTS)
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Process the event batch in this JSON file (`-` for stdin), print the result and exit
    #[arg(long)]
    pub event_file: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// optional one-shot event file.
    pub fn from_env_and_args() -> Result<(Self, Option<PathBuf>)> {
        // Parse CLI once
        let args = Args::parse();
        let event_file = args.event_file.clone();
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, event_file))
    }

    /// Merge CLI arguments over environment lookups over defaults.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &var, "PORT", 3000)?,
            backend: match args.backend {
                Some(backend) => backend,
                None => var("BACKEND")
                    .map(|v| v.parse())
                    .transpose()
                    .context("parsing RESIZER_BACKEND")?
                    .unwrap_or(StorageBackend::Local),
            },
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            s3_endpoint: args.s3_endpoint.or_else(|| var("S3_ENDPOINT")),
            region: args
                .region
                .or_else(|| var("REGION"))
                .or_else(|| lookup("AWS_REGION")),
            dest_bucket: args.dest_bucket.or_else(|| var("DEST_BUCKET")),
            topic: args.topic.or_else(|| var("TOPIC")),
            max_width: pick(args.max_width, &var, "MAX_WIDTH", 1024)?,
            max_height: pick(args.max_height, &var, "MAX_HEIGHT", 1024)?,
            max_pixels: pick(args.max_pixels, &var, "MAX_PIXELS", 8192 * 8192)?,
            jpeg_quality: pick(args.jpeg_quality, &var, "JPEG_QUALITY", 85)?,
            workers: pick(args.workers, &var, "WORKERS", 4)?,
            retry_attempts: pick(args.retry_attempts, &var, "RETRY_ATTEMPTS", 3)?,
            retry_base_delay_ms: pick(None, &var, "RETRY_BASE_DELAY_MS", 200)?,
            retry_max_delay_ms: pick(None, &var, "RETRY_MAX_DELAY_MS", 5000)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_width == 0 || self.max_height == 0 {
            bail!("maximum dimensions must be positive");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpeg quality must be between 1 and 100");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.retry_attempts == 0 {
            bail!("retry attempts must be at least 1");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            max_width: self.max_width,
            max_height: self.max_height,
            max_pixels: self.max_pixels,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            destination_bucket: self.dest_bucket.clone(),
            topic: self.topic.clone().unwrap_or_else(|| "image-processing".into()),
            workers: self.workers,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                multiplier: 2.0,
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
            },
        }
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            region: self.region.clone(),
            endpoint: self.s3_endpoint.clone(),
        }
    }
}

/// CLI value, else parsed `RESIZER_{name}`, else `default`.
fn pick<T>(arg: Option<T>, var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_env_or_args() {
        let cfg = AppConfig::merge(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, StorageBackend::Local);
        assert_eq!((cfg.max_width, cfg.max_height), (1024, 1024));
        assert_eq!(cfg.retry_attempts, 3);
        assert!(cfg.dest_bucket.is_none());
        assert!(cfg.topic.is_none());
    }

    #[test]
    fn env_overrides_defaults_and_args_override_env() {
        let env = env_of(&[
            ("RESIZER_PORT", "8080"),
            ("RESIZER_BACKEND", "s3"),
            ("RESIZER_DEST_BUCKET", "derived"),
            ("RESIZER_MAX_WIDTH", "640"),
            ("AWS_REGION", "eu-west-1"),
        ]);
        let args = Args {
            port: Some(9000),
            ..Args::default()
        };

        let cfg = AppConfig::merge(args, env).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.backend, StorageBackend::S3);
        assert_eq!(cfg.dest_bucket.as_deref(), Some("derived"));
        assert_eq!(cfg.max_width, 640);
        assert_eq!(cfg.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn invalid_numbers_are_reported_with_variable_name() {
        let err = AppConfig::merge(Args::default(), env_of(&[("RESIZER_PORT", "eighty")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("RESIZER_PORT"));
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(AppConfig::merge(Args::default(), env_of(&[("RESIZER_WORKERS", "0")])).is_err());
    }

    #[test]
    fn pipeline_config_carries_retry_settings() {
        let env = env_of(&[("RESIZER_RETRY_ATTEMPTS", "5"), ("RESIZER_RETRY_BASE_DELAY_MS", "50")]);
        let cfg = AppConfig::merge(Args::default(), env).unwrap();
        let pipeline = cfg.pipeline_config();
        assert_eq!(pipeline.retry.max_attempts, 5);
        assert_eq!(pipeline.retry.base_delay, Duration::from_millis(50));
        assert_eq!(pipeline.destination_bucket, None);
    }
}
