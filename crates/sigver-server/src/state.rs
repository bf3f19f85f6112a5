//! Shared application state for the Axum server.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use candle_core::Device;
use sigver_core::{SigError, DECISION_THRESHOLD};
use sigver_model::{ModelConfig, SiameseViT};

/// State handed to every handler through Axum `State`.
///
/// The model is read-only after startup, so it is shared through an `Arc`
/// without locking.
///
/// # Example
///
/// ```
/// use sigver_server::state::AppState;
///
/// let state = AppState::empty();
/// assert!(state.model.is_none());
/// ```
pub struct AppState {
    pub model: Option<Arc<SiameseViT>>,
    /// Confidence above which a candidate is called authentic.
    pub threshold: f32,
    /// When set, request paths must be relative and are resolved under it.
    pub image_root: Option<PathBuf>,
}

impl AppState {
    /// No model: `/api/verify` answers 503.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            model: None,
            threshold: DECISION_THRESHOLD,
            image_root: None,
        })
    }

    pub fn with_model(model: SiameseViT, threshold: f32) -> Arc<Self> {
        Self::serving(model, threshold, None)
    }

    /// Serves `model`, reading images only from below `image_root` when given.
    pub fn serving(model: SiameseViT, threshold: f32, image_root: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            model: Some(Arc::new(model)),
            threshold,
            image_root,
        })
    }

    /// Loads a checkpoint built for `config`.
    pub fn from_checkpoint(
        path: impl AsRef<Path>,
        config: &ModelConfig,
        device: &Device,
        threshold: f32,
        image_root: Option<PathBuf>,
    ) -> Result<Arc<Self>, SigError> {
        let model = sigver_train::load_model(path, config, device)?;
        Ok(Self::serving(model, threshold, image_root))
    }

    /// Maps a client-supplied image path to the file to open.
    ///
    /// With an image root, absolute paths and `..` components are refused.
    pub fn resolve_image(&self, requested: &str) -> Result<PathBuf, SigError> {
        let Some(root) = &self.image_root else {
            return Ok(PathBuf::from(requested));
        };
        let path = Path::new(requested);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(SigError::dataset(format!(
                "image path {requested:?} must be relative to the image root"
            )));
        }
        Ok(root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rooted(root: &str) -> AppState {
        AppState {
            model: None,
            threshold: DECISION_THRESHOLD,
            image_root: Some(PathBuf::from(root)),
        }
    }

    #[test]
    fn paths_pass_through_without_root() {
        let state = AppState::empty();
        assert_eq!(state.resolve_image("/tmp/a.png").unwrap(), PathBuf::from("/tmp/a.png"));
    }

    #[test]
    fn relative_paths_join_the_root() {
        let state = rooted("/data/signatures");
        assert_eq!(
            state.resolve_image("001/ref.png").unwrap(),
            PathBuf::from("/data/signatures/001/ref.png")
        );
    }

    #[test]
    fn escaping_paths_are_refused() {
        let state = rooted("/data/signatures");
        assert!(state.resolve_image("/etc/passwd").is_err());
        assert!(state.resolve_image("../secret.png").is_err());
        assert!(state.resolve_image("001/../../x.png").is_err());
    }
}
