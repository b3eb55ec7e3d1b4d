use serde::Serialize;

use super::tracker::Phase;

/// How a tracked job left the `Running` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed { message: String },
    Stopped,
    /// The server no longer knows the job id.
    Vanished,
}

/// Events published by the tracker to any number of subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    PhaseChanged {
        phase: Phase,
    },
    Attached {
        job_id: String,
        title: String,
        estimated_secs: u64,
        /// True when tracking resumed a job this client did not submit.
        reconnected: bool,
    },
    Progress {
        job_id: String,
        status: String,
        message: Option<String>,
        progress: Option<f64>,
        elapsed_secs: u64,
    },
    Finished {
        job_id: String,
        outcome: JobOutcome,
    },
    Queued {
        title: String,
    },
    Error {
        message: String,
    },
}
