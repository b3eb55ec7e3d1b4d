//! Client-side lifecycle of the studio's single active generation.
//!
//! [`Tracker`] holds an explicit [`TrackerState`] and mirrors server truth
//! into it through polls, sweeps and the queue handoff that follows every
//! finished job. It is meant to be owned by one task (see [`spawn`]); that
//! exclusive ownership is what keeps two cleanup or reattach sequences from
//! ever running at the same time.

mod actor;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::catalog::{ModelCatalog, ModelGateError};
use super::estimator::{self, JobShape};
use super::events::{JobOutcome, TrackerEvent};
use super::models::{GenerationJob, GpuInfo, JobStatus, QueueItem, SongRequest, TimingStats};
use super::progress::{GenerationSnapshot, ProgressBoard};
use super::queue::display_queue;
use crate::api::{ApiError, ApiResult, StudioApi};

pub use actor::{Cadence, TrackerHandle, spawn};
pub use state::{ActiveJob, Phase, TrackerState};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("No models downloaded.")]
    NoModelsDownloaded,
    #[error("No models ready.")]
    NoModelsReady,
    #[error("the server did not accept the queue submission")]
    QueueRejected,
    #[error("failed to start generation: {0}")]
    Submit(#[source] ApiError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("tracker task is no longer running")]
    Closed,
}

impl From<ModelGateError> for TrackerError {
    fn from(err: ModelGateError) -> Self {
        match err {
            ModelGateError::NoneDownloaded => Self::NoModelsDownloaded,
            ModelGateError::NoneReady => Self::NoModelsReady,
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started { job_id: String, estimated_secs: u64 },
    Queued,
    /// The server was already running something. Tracking now follows the
    /// server, attached to `job_id` if one was found.
    Reconciled { job_id: Option<String> },
}

/// Last known copies of the server's cosmetic lists.
#[derive(Debug, Default)]
struct Views {
    library: Vec<GenerationJob>,
    queue: Vec<QueueItem>,
    timing: Option<TimingStats>,
    gpu: Option<GpuInfo>,
    models: Option<ModelCatalog>,
}

pub struct Tracker {
    api: Arc<dyn StudioApi>,
    state: TrackerState,
    views: Views,
    last_error: Option<String>,
    events: broadcast::Sender<TrackerEvent>,
    board: ProgressBoard,
    /// Phase changes not yet announced. They go out after the board has
    /// been published, so a consumer reacting to one reads a matching
    /// snapshot.
    pending_phases: Vec<Phase>,
}

impl Tracker {
    pub fn new(api: Arc<dyn StudioApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            state: TrackerState::Idle,
            views: Views::default(),
            last_error: None,
            events,
            board: ProgressBoard::new(),
            pending_phases: Vec::new(),
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn board(&self) -> ProgressBoard {
        self.board.clone()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<TrackerEvent> {
        self.events.clone()
    }

    /// Load every view and resume tracking whatever the server is running.
    pub async fn init(&mut self, auto_download: bool) {
        self.refresh_views().await;
        if auto_download {
            self.auto_download().await;
        }
        self.reconnect_from_library();
        self.publish().await;
    }

    /// Reload every view; reattach if idle and the server is busy.
    pub async fn refresh(&mut self) {
        self.refresh_views().await;
        self.reconnect_from_library();
        self.publish().await;
    }

    /// Start `request` now, or append it to the server queue if a job is
    /// already being tracked.
    pub async fn submit(&mut self, mut request: SongRequest) -> Result<SubmitOutcome, TrackerError> {
        match self.resolve_model(&request.model).await {
            Ok(model) => {
                if model != request.model {
                    info!(requested = %request.model, using = %model, "Requested model not ready, substituting");
                }
                request.model = model;
            }
            Err(err) => {
                self.record_error(err.to_string());
                self.publish().await;
                return Err(err);
            }
        }

        if self.state.is_busy() {
            return self.enqueue(request).await;
        }
        self.start(request).await
    }

    async fn resolve_model(&mut self, requested: &str) -> Result<String, TrackerError> {
        match self.api.list_models().await {
            Ok(catalog) => self.views.models = Some(catalog),
            Err(err) if self.views.models.is_none() => return Err(err.into()),
            Err(err) => warn!(error = %err, "Model list refresh failed, using cached catalog"),
        }

        let catalog = self
            .views
            .models
            .as_ref()
            .ok_or(TrackerError::NoModelsDownloaded)?;
        Ok(catalog.resolve(requested)?)
    }

    async fn enqueue(&mut self, request: SongRequest) -> Result<SubmitOutcome, TrackerError> {
        let title = request.title.clone();
        match self.api.add_to_queue(&request).await {
            Ok(true) => {}
            Ok(false) => {
                self.record_error("Failed to add to queue".to_string());
                self.publish().await;
                return Err(TrackerError::QueueRejected);
            }
            Err(err) => {
                self.record_error(format!("Failed to add to queue: {err}"));
                self.publish().await;
                return Err(err.into());
            }
        }

        info!(title = %title, "Added to queue");
        self.refresh_queue().await;
        self.emit(TrackerEvent::Queued { title });
        self.publish().await;
        Ok(SubmitOutcome::Queued)
    }

    async fn start(&mut self, request: SongRequest) -> Result<SubmitOutcome, TrackerError> {
        self.last_error = None;
        self.keep_timing(self.api.timing_stats().await);

        let estimated_secs =
            estimator::estimate_shape(self.views.timing.as_ref(), JobShape::from_request(&request));
        self.set_state(TrackerState::Starting {
            payload: request.clone(),
            estimated_secs,
        });
        self.publish().await;

        match self.api.start_generation(&request).await {
            Ok(job_id) => {
                info!(job_id = %job_id, title = %request.title, estimated_secs, "Generation started");
                let title = request.title.clone();
                self.set_state(TrackerState::Running(ActiveJob::submitted(
                    job_id.clone(),
                    request,
                    estimated_secs,
                )));
                self.emit(TrackerEvent::Attached {
                    job_id: job_id.clone(),
                    title,
                    estimated_secs,
                    reconnected: false,
                });
                self.publish().await;
                Ok(SubmitOutcome::Started {
                    job_id,
                    estimated_secs,
                })
            }
            Err(err) if err.is_conflict() => {
                info!(error = %err, "Server already has a generation in progress, reconciling");
                self.set_state(TrackerState::Idle);
                self.refresh_views().await;
                self.reconnect_from_library();
                self.publish().await;
                Ok(SubmitOutcome::Reconciled {
                    job_id: self.state.current_job_id().map(str::to_string),
                })
            }
            Err(err) => {
                self.set_state(TrackerState::Idle);
                self.record_error(format!("Failed to start generation: {err}"));
                self.publish().await;
                Err(TrackerError::Submit(err))
            }
        }
    }

    /// Ask the server to stop the tracked job. The next poll observes the
    /// `stopped` status and runs cleanup.
    pub async fn stop_current(&mut self) -> Result<Option<String>, TrackerError> {
        let Some(job_id) = self.state.current_job_id().map(str::to_string) else {
            return Ok(None);
        };
        info!(job_id = %job_id, "Requesting stop");
        self.api.stop_generation(&job_id).await?;
        Ok(Some(job_id))
    }

    /// Drop a queued item, then refresh the queue regardless of the outcome.
    pub async fn remove_queued(&mut self, id: &str) -> Result<(), TrackerError> {
        let removed = self.api.remove_from_queue(id).await;
        self.refresh_queue().await;
        self.publish().await;
        removed.map_err(Into::into)
    }

    /// One status poll for the tracked job.
    pub async fn poll_current(&mut self) {
        let Some(job_id) = self.state.current_job_id().map(str::to_string) else {
            return;
        };

        let job = match self.api.fetch_generation(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(job_id = %job_id, "Generation no longer exists on the server");
                self.finish(job_id, JobOutcome::Vanished).await;
                return;
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Status poll failed, retrying on next poll");
                return;
            }
        };

        if let Some(active) = self.state.active_mut() {
            active.apply(&job);
            let event = TrackerEvent::Progress {
                job_id: job_id.clone(),
                status: active.status.to_string(),
                message: active.message.clone(),
                progress: active.progress,
                elapsed_secs: active.elapsed_secs(),
            };
            self.emit(event);
        }

        if !job.status.is_terminal() {
            self.publish().await;
            return;
        }

        let outcome = match job.status {
            JobStatus::Failed => JobOutcome::Failed {
                message: job
                    .message
                    .clone()
                    .unwrap_or_else(|| "Generation failed".to_string()),
            },
            JobStatus::Stopped => JobOutcome::Stopped,
            _ => JobOutcome::Completed,
        };
        self.finish(job_id, outcome).await;
    }

    /// Advance the local elapsed-time counter.
    pub async fn tick(&mut self, step: Duration) {
        if let Some(active) = self.state.active_mut() {
            active.tick(step);
            self.publish().await;
        }
    }

    /// Background consistency check. Only acts while idle.
    pub async fn sweep(&mut self) {
        if !matches!(self.state, TrackerState::Idle) {
            return;
        }

        let (library, queue) = tokio::join!(self.api.list_generations(), self.api.list_queue());
        match library {
            Ok(library) => self.views.library = library,
            Err(err) => {
                debug!(error = %err, "Sweep could not load the library");
                return;
            }
        }
        self.views.queue = cosmetic("queue", queue).unwrap_or_default();

        if self.reconnect_from_library() {
            info!("Sweep found a generation running on the server");
        }
        self.publish().await;
    }

    /// One "waiting for the next job" check during a queue handoff.
    pub async fn poll_next(&mut self) {
        let TrackerState::AwaitingNext { previous_job_id } = &self.state else {
            return;
        };
        let previous_job_id = previous_job_id.clone();

        let library = match self.api.list_generations().await {
            Ok(library) => library,
            Err(err) => {
                warn!(error = %err, "Could not load the library while waiting for the next job");
                self.fall_back_idle().await;
                return;
            }
        };
        self.views.library = library;

        let next = self
            .views
            .library
            .iter()
            .find(|job| job.status.is_in_flight() && job.id != previous_job_id)
            .cloned();
        if let Some(job) = next {
            self.attach(job).await;
            return;
        }

        self.views.queue = cosmetic("queue", self.api.list_queue().await).unwrap_or_default();
        if self.views.queue.is_empty() {
            info!("Queue drained");
            self.settle_idle().await;
            return;
        }
        self.publish().await;
    }

    /// Cleanup after the tracked job left `Running`.
    async fn finish(&mut self, job_id: String, outcome: JobOutcome) {
        let had_queued = !self.views.queue.is_empty();

        match &outcome {
            JobOutcome::Failed { message } => {
                warn!(job_id = %job_id, message = %message, "Generation failed");
                self.record_error(message.clone());
            }
            outcome => info!(job_id = %job_id, outcome = ?outcome, "Generation finished"),
        }
        self.emit(TrackerEvent::Finished {
            job_id: job_id.clone(),
            outcome,
        });

        if !had_queued {
            self.settle_idle().await;
            return;
        }

        self.set_state(TrackerState::AwaitingNext {
            previous_job_id: job_id,
        });
        self.poll_next().await;
    }

    async fn settle_idle(&mut self) {
        self.set_state(TrackerState::Idle);
        self.refresh_views().await;
        self.publish().await;
    }

    /// Start tracking a job promoted from the queue.
    async fn attach(&mut self, job: GenerationJob) {
        let loaded = tokio::try_join!(self.api.list_queue(), self.api.timing_stats());
        let (queue, timing) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Failed to attach to the next generation");
                self.fall_back_idle().await;
                return;
            }
        };
        self.views.queue = queue;
        self.views.timing = timing;
        self.track(&job, false);

        let (gpu, models) = tokio::join!(self.api.gpu_info(), self.api.list_models());
        self.views.gpu = cosmetic("gpu info", gpu).flatten();
        if let Some(models) = cosmetic("models", models) {
            self.views.models = Some(models);
        }
        self.publish().await;
    }

    /// Idle-safe state after a failed handoff. The next sweep reattaches if
    /// the server did promote something.
    async fn fall_back_idle(&mut self) {
        self.set_state(TrackerState::Idle);
        let (library, queue) = tokio::join!(self.api.list_generations(), self.api.list_queue());
        self.views.library = cosmetic("library", library).unwrap_or_default();
        self.views.queue = cosmetic("queue", queue).unwrap_or_default();
        self.publish().await;
    }

    /// Attach to the first in-flight job in the cached library. No-op unless
    /// idle, so repeated calls never double-track.
    fn reconnect_from_library(&mut self) -> bool {
        if !matches!(self.state, TrackerState::Idle) {
            return false;
        }
        let Some(job) = self
            .views
            .library
            .iter()
            .find(|job| job.status.is_in_flight())
            .cloned()
        else {
            return false;
        };

        self.track(&job, true);
        true
    }

    fn track(&mut self, job: &GenerationJob, reconnected: bool) {
        let estimated_secs = estimator::estimate_job(self.views.timing.as_ref(), job);
        let active = ActiveJob::reattached(job, estimated_secs);
        info!(
            job_id = %active.job_id,
            title = %active.payload.title,
            status = %active.status,
            estimated_secs,
            "Tracking generation"
        );

        let event = TrackerEvent::Attached {
            job_id: active.job_id.clone(),
            title: active.payload.title.clone(),
            estimated_secs,
            reconnected,
        };
        self.set_state(TrackerState::Running(active));
        self.emit(event);
    }

    async fn refresh_views(&mut self) {
        let (library, queue, timing, gpu, models) = tokio::join!(
            self.api.list_generations(),
            self.api.list_queue(),
            self.api.timing_stats(),
            self.api.gpu_info(),
            self.api.list_models(),
        );

        self.views.library = cosmetic("library", library).unwrap_or_default();
        self.views.queue = cosmetic("queue", queue).unwrap_or_default();
        self.keep_timing(timing);
        self.views.gpu = cosmetic("gpu info", gpu).flatten();
        if let Some(models) = cosmetic("models", models) {
            self.views.models = Some(models);
        }
    }

    /// Replace cached timing history only with a fresh copy; a failed or
    /// degraded fetch keeps the previous one.
    fn keep_timing(&mut self, result: ApiResult<Option<TimingStats>>) {
        if let Some(timing) = cosmetic("timing stats", result).flatten() {
            self.views.timing = Some(timing);
        }
    }

    async fn refresh_queue(&mut self) {
        self.views.queue = cosmetic("queue", self.api.list_queue().await).unwrap_or_default();
    }

    async fn auto_download(&mut self) {
        let Some(model_id) = self
            .views
            .models
            .as_ref()
            .and_then(ModelCatalog::auto_download_candidate)
            .map(str::to_string)
        else {
            return;
        };

        match self.api.start_model_download(&model_id).await {
            Ok(true) => info!(model = %model_id, "No model ready, downloading the recommended one"),
            Ok(false) => warn!(model = %model_id, "Server refused the model download"),
            Err(err) => warn!(model = %model_id, error = %err, "Model download request failed"),
        }
    }

    fn set_state(&mut self, state: TrackerState) {
        let before = self.state.phase();
        self.state = state;
        let after = self.state.phase();
        if before != after {
            debug!(from = %before, to = %after, "Tracker phase changed");
            self.pending_phases.push(after);
        }
    }

    fn record_error(&mut self, message: String) {
        self.emit(TrackerEvent::Error {
            message: message.clone(),
        });
        self.last_error = Some(message);
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn snapshot(&self) -> GenerationSnapshot {
        let mut snapshot = GenerationSnapshot {
            phase: self.state.phase(),
            queue: display_queue(
                &self.views.queue,
                self.state.current_job_id(),
                &self.views.library,
            ),
            library: self.views.library.clone(),
            gpu: self.views.gpu.clone(),
            last_error: self.last_error.clone(),
            ..Default::default()
        };

        match &self.state {
            TrackerState::Running(active) => {
                snapshot.job_id = Some(active.job_id.clone());
                snapshot.title = Some(active.payload.title.clone());
                snapshot.model = Some(active.payload.model.clone());
                snapshot.status = Some(active.status);
                snapshot.message = active.message.clone();
                snapshot.progress = active.progress;
                snapshot.elapsed_secs = active.elapsed_secs();
                snapshot.estimated_secs = Some(active.estimated_secs);
            }
            TrackerState::Starting {
                payload,
                estimated_secs,
            } => {
                snapshot.title = Some(payload.title.clone());
                snapshot.model = Some(payload.model.clone());
                snapshot.message = Some("Starting...".to_string());
                snapshot.estimated_secs = Some(*estimated_secs);
            }
            TrackerState::Idle | TrackerState::AwaitingNext { .. } => {}
        }
        snapshot
    }

    /// Publish the snapshot, then announce phase changes made since the
    /// last publish.
    async fn publish(&mut self) {
        self.board.publish(self.snapshot()).await;
        for phase in std::mem::take(&mut self.pending_phases) {
            self.emit(TrackerEvent::PhaseChanged { phase });
        }
    }
}

/// Cosmetic fetches degrade to `None` on failure.
fn cosmetic<T>(what: &str, result: ApiResult<T>) -> Option<T> {
    result
        .map_err(|err| debug!(view = what, error = %err, "Cosmetic fetch failed"))
        .ok()
}
