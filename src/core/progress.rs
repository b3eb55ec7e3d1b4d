//! Shared read-only view of the generation tracker.
//!
//! The tracker task is the only writer. Everyone else (CLI renderers,
//! watch loops) reads cloned snapshots without talking to the task.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use super::models::{GenerationJob, GpuInfo, JobStatus};
use super::queue::{QueueEntry, pending_count};
use super::tracker::Phase;

/// Everything a consumer needs to render the studio state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationSnapshot {
    pub phase: Phase,
    pub job_id: Option<String>,
    pub title: Option<String>,
    pub model: Option<String>,
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub elapsed_secs: u64,
    pub estimated_secs: Option<u64>,
    /// Reconciled queue, newest first.
    pub queue: Vec<QueueEntry>,
    pub library: Vec<GenerationJob>,
    pub gpu: Option<GpuInfo>,
    pub last_error: Option<String>,
}

impl GenerationSnapshot {
    /// Elapsed share of the estimate, capped at 1.0.
    pub fn eta_fraction(&self) -> Option<f64> {
        let estimated = self.estimated_secs.filter(|e| *e > 0)?;
        Some((self.elapsed_secs as f64 / estimated as f64).min(1.0))
    }

    pub fn remaining_secs(&self) -> Option<u64> {
        self.estimated_secs
            .map(|e| e.saturating_sub(self.elapsed_secs))
    }

    /// Songs still to come, counting the tracked one.
    pub fn pending_songs(&self) -> usize {
        pending_count(self.job_id.is_some(), self.queue.len())
    }
}

#[derive(Clone, Default)]
pub struct ProgressBoard {
    inner: Arc<RwLock<GenerationSnapshot>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot.
    pub async fn publish(&self, snapshot: GenerationSnapshot) {
        *self.inner.write().await = snapshot;
    }

    pub async fn get(&self) -> GenerationSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn phase(&self) -> Phase {
        self.inner.read().await.phase
    }

    pub async fn current_job_id(&self) -> Option<String> {
        self.inner.read().await.job_id.clone()
    }
}
