//! Scripted in-memory studio server shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use songgen::api::{ApiError, ApiResult, StudioApi};
use songgen::core::catalog::{ModelCatalog, ModelInfo, ModelStatus};
use songgen::core::models::{
    GenerationJob, GpuInfo, JobStatus, QueueItem, Section, SongRequest, TimingStats,
};

/// Reply to one `fetch_generation` call.
#[derive(Debug, Clone)]
pub enum PollReply {
    Job(GenerationJob),
    NotFound,
    Error(u16),
}

#[derive(Debug, Default)]
pub struct Calls {
    pub started: Vec<SongRequest>,
    pub queued: Vec<SongRequest>,
    pub fetched: Vec<String>,
    pub stopped: Vec<String>,
    pub removed: Vec<String>,
    pub library_loads: usize,
    pub model_downloads: Vec<String>,
}

#[derive(Debug)]
pub struct StudioState {
    pub library: Vec<GenerationJob>,
    pub queue: Vec<QueueItem>,
    pub timing: Option<TimingStats>,
    pub gpu: Option<GpuInfo>,
    pub models: ModelCatalog,
    /// Per-job poll script. The last reply repeats once the rest is used up.
    pub polls: HashMap<String, VecDeque<PollReply>>,
    /// Next `start_generation` result; `Err` holds an HTTP status and body.
    pub start_reply: Option<Result<String, (u16, String)>>,
    pub accept_queue: bool,
    pub fail_library: bool,
    pub fail_queue: bool,
    pub fail_timing: bool,
    /// Simulated round trip for library and queue listings.
    pub list_delay: Option<Duration>,
    pub calls: Calls,
    next_id: usize,
}

impl Default for StudioState {
    fn default() -> Self {
        Self {
            library: Vec::new(),
            queue: Vec::new(),
            timing: None,
            gpu: None,
            models: ready_catalog(),
            polls: HashMap::new(),
            start_reply: None,
            accept_queue: true,
            fail_library: false,
            fail_queue: false,
            fail_timing: false,
            list_delay: None,
            calls: Calls::default(),
            next_id: 0,
        }
    }
}

#[derive(Default)]
pub struct FakeStudio {
    state: Mutex<StudioState>,
}

impl FakeStudio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, StudioState> {
        self.state.lock().unwrap()
    }

    /// Queue up replies for polls of `id`.
    pub fn script(&self, id: &str, replies: Vec<PollReply>) {
        self.state()
            .polls
            .insert(id.to_string(), replies.into_iter().collect());
    }

    async fn round_trip(&self) {
        let delay = self.state().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn server_error(status: u16) -> ApiError {
        ApiError::Status {
            status,
            body: "internal error".to_string(),
        }
    }
}

#[async_trait]
impl StudioApi for FakeStudio {
    async fn start_generation(&self, request: &SongRequest) -> ApiResult<String> {
        let mut state = self.state();
        state.calls.started.push(request.clone());
        match state.start_reply.take() {
            Some(Ok(id)) => Ok(id),
            Some(Err((status, body))) => Err(ApiError::Status { status, body }),
            None => {
                state.next_id += 1;
                Ok(format!("gen-{}", state.next_id))
            }
        }
    }

    async fn fetch_generation(&self, id: &str) -> ApiResult<Option<GenerationJob>> {
        let mut state = self.state();
        state.calls.fetched.push(id.to_string());

        let reply = match state.polls.get_mut(id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };

        match reply {
            Some(PollReply::Job(job)) => Ok(Some(job)),
            Some(PollReply::NotFound) => Ok(None),
            Some(PollReply::Error(status)) => Err(Self::server_error(status)),
            None => Ok(state.library.iter().find(|job| job.id == id).cloned()),
        }
    }

    async fn stop_generation(&self, id: &str) -> ApiResult<()> {
        self.state().calls.stopped.push(id.to_string());
        Ok(())
    }

    async fn delete_generation(&self, id: &str) -> ApiResult<bool> {
        let mut state = self.state();
        let before = state.library.len();
        state.library.retain(|job| job.id != id);
        Ok(state.library.len() < before)
    }

    async fn list_generations(&self) -> ApiResult<Vec<GenerationJob>> {
        self.round_trip().await;
        let mut state = self.state();
        state.calls.library_loads += 1;
        if state.fail_library {
            return Err(Self::server_error(500));
        }
        Ok(state.library.clone())
    }

    async fn list_queue(&self) -> ApiResult<Vec<QueueItem>> {
        self.round_trip().await;
        let state = self.state();
        if state.fail_queue {
            return Err(Self::server_error(502));
        }
        Ok(state.queue.clone())
    }

    async fn add_to_queue(&self, request: &SongRequest) -> ApiResult<bool> {
        let mut state = self.state();
        state.calls.queued.push(request.clone());
        if !state.accept_queue {
            return Ok(false);
        }
        state.next_id += 1;
        let id = format!("q-{}", state.next_id);
        state.queue.push(QueueItem {
            id,
            request: request.clone(),
        });
        Ok(true)
    }

    async fn remove_from_queue(&self, id: &str) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.removed.push(id.to_string());
        state.queue.retain(|item| item.id != id);
        Ok(())
    }

    async fn gpu_info(&self) -> ApiResult<Option<GpuInfo>> {
        Ok(self.state().gpu.clone())
    }

    async fn timing_stats(&self) -> ApiResult<Option<TimingStats>> {
        let state = self.state();
        if state.fail_timing {
            return Err(Self::server_error(503));
        }
        Ok(state.timing.clone())
    }

    async fn list_models(&self) -> ApiResult<ModelCatalog> {
        Ok(self.state().models.clone())
    }

    async fn start_model_download(&self, model_id: &str) -> ApiResult<bool> {
        self.state().calls.model_downloads.push(model_id.to_string());
        Ok(true)
    }

    async fn cancel_model_download(&self, _model_id: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn delete_model(&self, _model_id: &str) -> ApiResult<bool> {
        Ok(true)
    }

    async fn rename_generation(&self, id: &str, title: &str) -> ApiResult<()> {
        if let Some(job) = self.state().library.iter_mut().find(|job| job.id == id) {
            job.title = Some(title.to_string());
        }
        Ok(())
    }

    async fn download_track(
        &self,
        _id: &str,
        _track: u32,
        _format: Option<&str>,
    ) -> ApiResult<Vec<u8>> {
        Ok(b"RIFF".to_vec())
    }
}

pub fn job(id: &str, status: JobStatus) -> GenerationJob {
    serde_json::from_value(json!({ "id": id, "status": status })).unwrap()
}

pub fn running_job(id: &str, status: JobStatus, elapsed: f64) -> GenerationJob {
    serde_json::from_value(json!({
        "id": id,
        "status": status,
        "progress": 40.0,
        "message": "Generating audio",
        "elapsed_seconds": elapsed,
    }))
    .unwrap()
}

pub fn failed_job(id: &str, message: &str) -> GenerationJob {
    serde_json::from_value(json!({ "id": id, "status": "failed", "message": message })).unwrap()
}

pub fn song(title: &str) -> SongRequest {
    SongRequest {
        title: title.to_string(),
        sections: vec![Section {
            kind: "verse".to_string(),
            lyrics: None,
        }],
        ..SongRequest::default()
    }
}

pub fn model(id: &str, status: ModelStatus) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        size_gb: Some(11.3),
        vram_required: Some(10.0),
        status,
        progress: None,
    }
}

pub fn ready_catalog() -> ModelCatalog {
    ModelCatalog {
        models: vec![
            model("songgeneration_base", ModelStatus::Ready),
            model("songgeneration_large", ModelStatus::NotDownloaded),
        ],
        ready_models: None,
        has_ready_model: true,
        recommended: Some("songgeneration_base".to_string()),
        default: Some("songgeneration_base".to_string()),
    }
}
