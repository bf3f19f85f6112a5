//! # sigver-core
//!
//! Shared foundation for the sigver signature verifier.
//!
//! ## Key Components
//!
//! - [`SigError`]: error type used across the workspace
//! - [`SignatureImage`]: grayscale, resized, normalized signature raster
//! - [`SignaturePair`] / [`Label`]: the labeled training sample
//!
//! ## Architecture Rules
//!
//! - No model code here; tensors appear only at the image boundary.
//! - Every other `sigver-*` crate depends on this one.

pub mod error;
pub mod image;
pub mod pair;

pub use error::SigError;
pub use image::SignatureImage;
pub use pair::{Label, SignaturePair};

/// Canonical image height in pixels.
pub const IMAGE_HEIGHT: usize = 128;

/// Canonical image width in pixels.
pub const IMAGE_WIDTH: usize = 256;

/// Canonical patch height.
pub const PATCH_HEIGHT: usize = 16;

/// Canonical patch width.
pub const PATCH_WIDTH: usize = 32;

/// Canonical token embedding dimension.
pub const EMBED_DIM: usize = 256;

/// Width of the convolutional branch descriptor.
pub const CONV_FEATURE_DIM: usize = 512;

/// Per-channel normalization mean.
pub const NORMALIZE_MEAN: f32 = 0.5;

/// Per-channel normalization standard deviation.
pub const NORMALIZE_STD: f32 = 0.5;

/// Guard added to the reference descriptor in the comparator's ratio term.
pub const RATIO_EPSILON: f64 = 1e-8;

/// Guard added to metric denominators.
pub const METRIC_EPSILON: f64 = 1e-8;

/// Probability above which a pair is called authentic.
pub const DECISION_THRESHOLD: f32 = 0.5;
