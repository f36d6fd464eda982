//! Defines the HTTP surface of the resizer.
//!
//! ## Structure
//! - `POST /events`: process a storage notification batch
//! - `GET  /healthz`: liveness
//! - `GET  /readyz`: readiness (probes the object store)

use crate::{
    handlers::{
        event_handlers::process_events,
        health_handlers::{healthz, readyz},
    },
    services::pipeline::Pipeline,
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// Build and return the router.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events", post(process_events))
}
