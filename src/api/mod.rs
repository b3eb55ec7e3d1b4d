//! Remote job API of the song-generation studio server.
//!
//! [`StudioApi`] is the seam the tracker and the CLI talk through;
//! [`HttpStudioApi`] is the reqwest implementation used in production.
//!
//! Status-list endpoints (queue, GPU, timing stats) feed purely cosmetic
//! views, so they degrade to an empty or absent result on a non-2xx reply
//! instead of failing.

mod http;

use async_trait::async_trait;

use crate::core::catalog::ModelCatalog;
use crate::core::models::{GenerationJob, GpuInfo, QueueItem, SongRequest, TimingStats};

pub use http::HttpStudioApi;

/// Errors from the studio HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request itself failed (connect, timeout, decode).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The configured server URL cannot carry API paths.
    #[error("invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ApiError {
    /// The server refused a start because a job is already running.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Status { status, body } => {
                *status == 409 || body.to_ascii_lowercase().contains("already in progress")
            }
            Self::Request(_) | Self::InvalidUrl { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[async_trait]
pub trait StudioApi: Send + Sync {
    /// `POST /api/generate`; returns the new job id.
    async fn start_generation(&self, request: &SongRequest) -> ApiResult<String>;

    /// `GET /api/generation/{id}`; `None` when the server does not know the id.
    async fn fetch_generation(&self, id: &str) -> ApiResult<Option<GenerationJob>>;

    /// `POST /api/stop/{id}`. Only the transport can fail.
    async fn stop_generation(&self, id: &str) -> ApiResult<()>;

    /// `DELETE /api/generation/{id}`; true when the server accepted it.
    async fn delete_generation(&self, id: &str) -> ApiResult<bool>;

    /// `GET /api/generations`, newest first.
    async fn list_generations(&self) -> ApiResult<Vec<GenerationJob>>;

    /// `GET /api/queue`, oldest first. Empty on a non-2xx reply.
    async fn list_queue(&self) -> ApiResult<Vec<QueueItem>>;

    /// `POST /api/queue`; true when the item was accepted.
    async fn add_to_queue(&self, request: &SongRequest) -> ApiResult<bool>;

    /// `DELETE /api/queue/{id}`.
    async fn remove_from_queue(&self, id: &str) -> ApiResult<()>;

    async fn gpu_info(&self) -> ApiResult<Option<GpuInfo>>;

    async fn timing_stats(&self) -> ApiResult<Option<TimingStats>>;

    async fn list_models(&self) -> ApiResult<ModelCatalog>;

    async fn start_model_download(&self, model_id: &str) -> ApiResult<bool>;

    async fn cancel_model_download(&self, model_id: &str) -> ApiResult<()>;

    async fn delete_model(&self, model_id: &str) -> ApiResult<bool>;

    /// `PUT /api/generation/{id}` with a new title.
    async fn rename_generation(&self, id: &str, title: &str) -> ApiResult<()>;

    /// Raw bytes of one output track (`GET /api/audio/{id}/{track}`),
    /// optionally transcoded by the server to `format` (flac, mp3, wav).
    async fn download_track(
        &self,
        id: &str,
        track: u32,
        format: Option<&str>,
    ) -> ApiResult<Vec<u8>>;
}
