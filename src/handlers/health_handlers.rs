//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the configured object store

use crate::routes::routes::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body
/// and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Asks the object store backend to prove it is reachable. HTTP 200 when the
/// probe passes, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.pipeline.store();
    let store_check = match store.probe().await {
        Ok(()) => CheckStatus {
            ok: true,
            backend: store.backend(),
            error: None,
        },
        Err(e) => {
            tracing::warn!(backend = store.backend(), error = %e, "readiness probe failed");
            CheckStatus {
                ok: false,
                backend: store.backend(),
                error: Some(e.to_string()),
            }
        }
    };

    let overall_ok = store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("object_store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    backend: &'static str,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::local_store::LocalObjectStore;
    use crate::services::notifier::LogNotifier;
    use crate::services::pipeline::{Pipeline, PipelineConfig};
    use crate::services::transformer::{ImageTransformer, TransformConfig};
    use std::sync::Arc;

    fn state_over(base: impl Into<std::path::PathBuf>) -> AppState {
        let pipeline = Pipeline::new(
            Arc::new(LocalObjectStore::new(base)),
            Arc::new(ImageTransformer::new(TransformConfig::default())),
            Arc::new(LogNotifier),
            PipelineConfig::default(),
        );
        AppState::new(Arc::new(pipeline))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_ok_for_writable_store() {
        let dir = tempfile::tempdir().unwrap();
        let response = readyz(State(state_over(dir.path()))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_unavailable_when_store_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let response = readyz(State(state_over(blocker))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
