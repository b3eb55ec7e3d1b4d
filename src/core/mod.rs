pub mod catalog;
pub mod estimator;
pub mod events;
pub mod models;
pub mod progress;
pub mod queue;
pub mod tracker;

pub use catalog::{ModelCatalog, ModelInfo, ModelStatus};
pub use events::{JobOutcome, TrackerEvent};
pub use models::{GenerationJob, JobStatus, QueueItem, SongRequest};
pub use progress::{GenerationSnapshot, ProgressBoard};
pub use tracker::{Phase, SubmitOutcome, Tracker, TrackerError, TrackerHandle};
