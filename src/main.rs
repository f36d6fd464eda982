use anyhow::{Context, Result};
use axum::Router;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{io::AsyncReadExt, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, StorageBackend};
use models::event::StorageEvent;
use services::{
    local_store::LocalObjectStore,
    notifier::{LogNotifier, Notifier, SnsNotifier},
    object_store::{MemoryObjectStore, ObjectStore},
    pipeline::Pipeline,
    s3_store::S3ObjectStore,
    transformer::ImageTransformer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    // Logs go to stderr so one-shot mode can print its result on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + one-shot event file ---
    let (cfg, event_file) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-resizer with config: {:?}", cfg);

    // --- Initialize core services ---
    let store = build_store(&cfg).await?;
    let notifier = build_notifier(&cfg).await;
    let transformer = Arc::new(ImageTransformer::new(cfg.transform_config()));
    let pipeline = Arc::new(Pipeline::new(
        store,
        transformer,
        notifier,
        cfg.pipeline_config(),
    ));

    // --- Handle one-shot mode ---
    if let Some(path) = event_file {
        return run_once(&pipeline, &path).await;
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(routes::routes::AppState::new(pipeline));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        StorageBackend::Local => {
            // --- Ensure storage directory exists ---
            if !Path::new(&cfg.storage_dir).exists() {
                std::fs::create_dir_all(&cfg.storage_dir)
                    .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            Arc::new(LocalObjectStore::new(&cfg.storage_dir))
        }
        StorageBackend::S3 => Arc::new(S3ObjectStore::connect(&cfg.s3_settings()).await),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory object store; contents are lost on exit");
            Arc::new(MemoryObjectStore::new())
        }
    };
    tracing::info!(backend = store.backend(), "object store ready");
    Ok(store)
}

async fn build_notifier(cfg: &AppConfig) -> Arc<dyn Notifier> {
    match &cfg.topic {
        Some(topic) => {
            tracing::info!(topic = %topic, "publishing outcomes to SNS");
            Arc::new(SnsNotifier::connect(cfg.region.clone()).await)
        }
        None => {
            tracing::info!("No topic configured; outcomes are logged only");
            Arc::new(LogNotifier)
        }
    }
}

/// Process a single event batch from `path` (or stdin for `-`) and print
/// the batch result as JSON.
async fn run_once(pipeline: &Pipeline, path: &PathBuf) -> Result<()> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("reading event batch from stdin")?;
        buf
    } else {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("reading event batch from {}", path.display()))?
    };

    let event: StorageEvent = serde_json::from_slice(&raw).context("parsing event batch")?;
    let result = pipeline.process_event(&event).await;
    tracing::info!(
        succeeded = result.succeeded(),
        failed = result.failed(),
        notification_failures = result.notification_failures(),
        "Event batch processed"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
