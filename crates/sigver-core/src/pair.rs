//! Training sample: a labeled (reference, candidate) pair.

use serde::{Deserialize, Serialize};

use crate::error::SigError;
use crate::image::SignatureImage;

/// Pair label. `Authentic` (1) means both images come from the same hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Different or forged source (0).
    Forged,
    /// Same authentic source (1).
    Authentic,
}

impl Label {
    /// Parses the integer label used in pairing lists.
    ///
    /// # Errors
    ///
    /// Returns [`SigError::Dataset`] for anything other than 0 or 1.
    pub fn from_value(value: i64) -> Result<Self, SigError> {
        match value {
            0 => Ok(Self::Forged),
            1 => Ok(Self::Authentic),
            other => Err(SigError::dataset(format!(
                "label must be 0 or 1, got {other}"
            ))),
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Self::Forged => 0.0,
            Self::Authentic => 1.0,
        }
    }
}

/// One training or validation sample.
#[derive(Debug, Clone)]
pub struct SignaturePair {
    /// Trusted reference signature.
    pub reference: SignatureImage,
    /// Signature under examination.
    pub candidate: SignatureImage,
    pub label: Label,
}
