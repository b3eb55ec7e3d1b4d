use std::time::Duration;

use serde::Serialize;

use crate::core::models::{GenerationJob, JobStatus, SongRequest};

/// Coarse tracker phase, as published to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Running,
    /// A job just finished and queued work may be promoted at any moment.
    AwaitingNext,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::AwaitingNext => "awaiting_next",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The job currently being tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveJob {
    pub job_id: String,
    pub payload: SongRequest,
    pub status: JobStatus,
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub elapsed: Duration,
    pub estimated_secs: u64,
    /// The elapsed-time ticker only runs once the job has left `pending`.
    pub ticking: bool,
}

impl ActiveJob {
    /// A job this client just started.
    pub fn submitted(job_id: String, payload: SongRequest, estimated_secs: u64) -> Self {
        Self {
            job_id,
            payload,
            status: JobStatus::Pending,
            message: None,
            progress: None,
            elapsed: Duration::ZERO,
            estimated_secs,
            ticking: false,
        }
    }

    /// A job discovered on the server.
    pub fn reattached(job: &GenerationJob, estimated_secs: u64) -> Self {
        let ticking = job.has_started();
        let elapsed = if ticking {
            seconds(job.elapsed_seconds)
        } else {
            Duration::ZERO
        };

        Self {
            job_id: job.id.clone(),
            payload: job.reconstruct_request(),
            status: job.status,
            message: job.message.clone(),
            progress: job.progress,
            elapsed,
            estimated_secs,
            ticking,
        }
    }

    /// Overwrite local fields from a polled record.
    pub fn apply(&mut self, job: &GenerationJob) {
        self.status = job.status;
        self.message = job.message.clone();
        self.progress = job.progress;

        if job.elapsed_seconds.is_some() {
            self.elapsed = seconds(job.elapsed_seconds);
        }
        if !self.ticking && job.has_started() {
            self.ticking = true;
        }
    }

    pub fn tick(&mut self, step: Duration) {
        if self.ticking {
            self.elapsed += step;
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.as_secs()
    }
}

fn seconds(value: Option<f64>) -> Duration {
    value
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::ZERO)
}

/// Tracker state machine.
///
/// `Starting` exists only while the start request is in flight. Leaving
/// `Running` always goes through cleanup, which lands in `Idle`,
/// `AwaitingNext` or a fresh `Running`. Every state except `Idle` counts as
/// busy, so submissions made while queued work is being handed over still
/// go to the server queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TrackerState {
    #[default]
    Idle,
    Starting {
        payload: SongRequest,
        estimated_secs: u64,
    },
    Running(ActiveJob),
    AwaitingNext {
        /// The job that just finished; ignored if the server still lists it.
        previous_job_id: String,
    },
}

impl TrackerState {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Starting { .. } => Phase::Starting,
            Self::Running(_) => Phase::Running,
            Self::AwaitingNext { .. } => Phase::AwaitingNext,
        }
    }

    pub fn active(&self) -> Option<&ActiveJob> {
        match self {
            Self::Running(job) => Some(job),
            _ => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveJob> {
        match self {
            Self::Running(job) => Some(job),
            _ => None,
        }
    }

    pub fn current_job_id(&self) -> Option<&str> {
        self.active().map(|job| job.job_id.as_str())
    }

    /// New submissions go to the server queue while this holds.
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn polls_job(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    pub fn ticks(&self) -> bool {
        self.active().is_some_and(|job| job.ticking)
    }

    pub fn awaits_next(&self) -> bool {
        matches!(self, Self::AwaitingNext { .. })
    }
}
