//! # sigver-server
//!
//! HTTP front end for the signature verifier.
//!
//! ## Endpoints
//!
//! - `GET /health`: liveness plus whether a model is loaded
//! - `GET /api/model`: architecture and decision threshold of the loaded model
//! - `POST /api/verify`: score a candidate signature against a reference
//!
//! ## Architecture Rules
//!
//! - Leaf crate: nothing depends on `sigver-server`.
//! - Model inference runs on the blocking pool, never on the async executor.
//! - Without a loaded model, verification answers 503.

pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Router with no model loaded.
///
/// # Example
///
/// ```no_run
/// use sigver_server::build_app;
///
/// #[tokio::main]
/// async fn main() {
///     let app = build_app();
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
///     axum::serve(listener, app).await.unwrap();
/// }
/// ```
pub fn build_app() -> Router {
    build_app_with_state(AppState::empty())
}

/// Router over a pre-built [`AppState`].
pub fn build_app_with_state(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/model", get(routes::model_info))
        .route("/api/verify", post(routes::verify))
        .with_state(state)
}
