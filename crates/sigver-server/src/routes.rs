//! Axum route handlers for the HTTP API.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use sigver_core::{SigError, SignatureImage};
use sigver_model::SiameseViT;
use sigver_train::Verdict;

use crate::models::{ErrorResponse, HealthResponse, ModelInfoResponse, VerifyRequest, VerifyResponse};
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn require_model(state: &AppState) -> Result<Arc<SiameseViT>, ApiError> {
    state.model.clone().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "no model loaded; start the server with --checkpoint",
        )
    })
}

/// `GET /health`
///
/// ```json
/// {"status": "ok", "version": "0.1.0", "model_loaded": true}
/// ```
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.model.is_some(),
    })
}

/// `GET /api/model`
///
/// # Errors
///
/// - 503 Service Unavailable: no model loaded
pub async fn model_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelInfoResponse>, ApiError> {
    let model = require_model(&state)?;
    Ok(Json(ModelInfoResponse {
        config: model.config().clone(),
        parameters: model.num_parameters(),
        threshold: state.threshold,
    }))
}

/// `POST /api/verify`: scores `candidate_path` against `reference_path`.
///
/// Both images are decoded, converted to grayscale and resized to the
/// model's input size on the server side.
///
/// # Errors
///
/// - 400 Bad Request: empty path, path outside the image root, unreadable or
///   undecodable image
/// - 422 Unprocessable Entity: invalid JSON (handled by Axum)
/// - 503 Service Unavailable: no model loaded
/// - 500 Internal Server Error: inference failure
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let model = require_model(&state)?;
    if request.reference_path.trim().is_empty() || request.candidate_path.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "reference_path and candidate_path must be non-empty",
        ));
    }

    let reference_path = state
        .resolve_image(&request.reference_path)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let candidate_path = state
        .resolve_image(&request.candidate_path)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let threshold = state.threshold;
    let start = Instant::now();
    let verdict = tokio::task::spawn_blocking(move || -> Result<Verdict, SigError> {
        let (h, w) = (model.config().image_height, model.config().image_width);
        let reference = SignatureImage::from_path(&reference_path, h, w)?;
        let candidate = SignatureImage::from_path(&candidate_path, h, w)?;
        sigver_train::verify(&model, &reference, &candidate, threshold)
    })
    .await
    .map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("inference task failed: {e}"),
        )
    })?
    .map_err(|e| match e {
        SigError::Dataset { .. } | SigError::ShapeMismatch { .. } => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        other => {
            tracing::error!(error = %other, "verification failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    })?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    tracing::info!(
        authentic = verdict.authentic,
        confidence = verdict.confidence,
        elapsed_ms,
        "verified pair"
    );
    Ok(Json(VerifyResponse {
        authentic: verdict.authentic,
        confidence: verdict.confidence,
        threshold,
        elapsed_ms,
    }))
}
