//! # Nestlog Sync Server
//!
//! Real-time synchronization server for the nestlog event log.
//!
//! This crate provides:
//! - The WebSocket endpoint: cookie auth gate, per-connection session,
//!   protocol handlers (ack-then-broadcast)
//! - The family-scoped sync hub (fan-out, presence)
//! - The operator surface (login, family CRUD, access links, summaries)
//! - The `nestlogd` binary

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod admin;
mod config;
mod error;
mod handlers;
mod hub;
mod session;

pub use config::ServerConfig;
pub use hub::SyncHub;

use axum::routing::get;
use axum::{Json, Router};
use nestlog_store::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state behind every route and session.
#[derive(Clone)]
pub struct AppState {
    /// The durable record store.
    pub store: Arc<RecordStore>,
    /// The in-memory session registry.
    pub hub: Arc<SyncHub>,
}

impl AppState {
    /// Creates the app state around an open store.
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            hub: Arc::new(SyncHub::new()),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Builds the full router: sync endpoint, client entry point, operator
/// surface, health probe.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(session::ws_handler))
        .merge(admin::routes(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
