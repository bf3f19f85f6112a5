//! JSON request and response models for the HTTP API.

use serde::{Deserialize, Serialize};
use sigver_model::ModelConfig;

/// Request body for `POST /api/verify`.
///
/// # Example
///
/// ```
/// use sigver_server::models::VerifyRequest;
///
/// let json = r#"{"reference_path": "a.png", "candidate_path": "b.png"}"#;
/// let req: VerifyRequest = serde_json::from_str(json).unwrap();
/// assert_eq!(req.candidate_path, "b.png");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Path of the trusted reference signature, as seen by the server.
    pub reference_path: String,
    /// Path of the signature under examination.
    pub candidate_path: String,
}

/// Response body for `POST /api/verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub authentic: bool,
    /// Probability in `[0, 1]`.
    pub confidence: f32,
    pub threshold: f32,
    /// Image decoding plus inference time.
    pub elapsed_ms: f64,
}

/// Response body for `GET /api/model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub config: ModelConfig,
    pub parameters: usize,
    pub threshold: f32,
}

/// Error response body.
///
/// # Example
///
/// ```
/// use sigver_server::models::ErrorResponse;
///
/// let err = ErrorResponse { error: "bad input".into() };
/// let json = serde_json::to_string(&err).unwrap();
/// assert!(json.contains("bad input"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
}
