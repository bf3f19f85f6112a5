//! # sigver-model
//!
//! Siamese signature verifier built on candle.
//!
//! ## Key Components
//!
//! - [`ModelConfig`]: architecture hyperparameters, validated up front
//! - [`SignatureViT`]: patch embedding + pre-norm transformer, `[B, 2D]` descriptor
//! - [`ConvFeatureExtractor`]: four-stage CNN, `[B, F]` descriptor
//! - [`AsymmetricComparator`]: six-term fusion MLP producing a probability
//! - [`SiameseViT`]: owns the [`candle_nn::VarMap`] and wires the above together
//!
//! ## Train vs eval
//!
//! Every forward pass takes an explicit `train` flag. With `train = false`
//! dropout is the identity and batch norm uses its running statistics, so
//! repeated predictions on the same input are identical.

mod nn;

pub mod comparator;
pub mod config;
pub mod conv;
pub mod patch_embed;
pub mod siamese;
pub mod transformer;
pub mod vit;

pub use comparator::{AsymmetricComparator, Descriptors};
pub use config::ModelConfig;
pub use conv::ConvFeatureExtractor;
pub use patch_embed::PatchEmbedding;
pub use siamese::{is_buffer, SiameseViT};
pub use transformer::TransformerBlock;
pub use vit::SignatureViT;
