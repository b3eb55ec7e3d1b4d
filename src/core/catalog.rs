//! Model registry as reported by `GET /api/models`.
//!
//! The tracker consults the catalog before submitting: a job can only run
//! on a model the server has fully downloaded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ready,
    Downloading,
    NotDownloaded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size_gb: Option<f64>,
    #[serde(default)]
    pub vram_required: Option<f64>,
    pub status: ModelStatus,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl ModelInfo {
    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Ready
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
    pub ready_models: Option<Vec<ModelInfo>>,
    pub has_ready_model: bool,
    pub recommended: Option<String>,
    pub default: Option<String>,
}

/// Why a submission cannot pick a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ModelGateError {
    #[error("No models downloaded.")]
    NoneDownloaded,
    #[error("No models ready.")]
    NoneReady,
}

impl ModelCatalog {
    /// Models usable right now. Falls back to filtering `models` when the
    /// server does not send a separate ready list.
    pub fn ready(&self) -> Vec<&ModelInfo> {
        match &self.ready_models {
            Some(ready) => ready.iter().collect(),
            None => self.models.iter().filter(|m| m.is_ready()).collect(),
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.models
            .iter()
            .any(|m| m.status == ModelStatus::Downloading)
    }

    /// Pick the model a submission should run on.
    ///
    /// Keeps `requested` when it is ready; otherwise substitutes the first
    /// ready model.
    pub fn resolve(&self, requested: &str) -> Result<String, ModelGateError> {
        let ready = self.ready();
        if !self.has_ready_model || ready.is_empty() {
            return Err(ModelGateError::NoneDownloaded);
        }

        if ready.iter().any(|m| m.id == requested && m.is_ready()) {
            return Ok(requested.to_string());
        }

        ready
            .iter()
            .find(|m| m.is_ready())
            .map(|m| m.id.clone())
            .ok_or(ModelGateError::NoneReady)
    }

    /// Model to fetch automatically on a fresh install, if any.
    pub fn auto_download_candidate(&self) -> Option<&str> {
        if self.has_ready_model || self.is_downloading() {
            return None;
        }
        self.recommended.as_deref()
    }
}
