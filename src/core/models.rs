//! Wire types shared by the studio API client and the generation tracker.
//!
//! The server owns every record here. The client only holds read-only
//! projections, so most fields are optional and unknown fields are ignored.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Model used when neither the payload nor the job metadata names one.
pub const DEFAULT_MODEL: &str = "songgeneration_base";

/// Lifecycle status of a generation job as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Generating,
    Processing,
    Completed,
    Failed,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Pending, generating or processing.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Generating | Self::Processing)
    }

    /// No further transitions are expected once a job reaches one of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One song section of a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub lyrics: Option<String>,
}

impl Section {
    pub fn lyrics_len(&self) -> usize {
        self.lyrics.as_deref().map_or(0, |l| l.chars().count())
    }
}

/// Submission payload for `POST /api/generate` and `POST /api/queue`.
///
/// Only `title`, `model`, `sections` and `reference_audio_id` matter to the
/// tracker and estimator; the remaining hyperparameters are passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongRequest {
    pub title: String,
    pub sections: Vec<Section>,
    pub gender: String,
    pub timbre: String,
    pub genre: String,
    pub emotion: String,
    pub instruments: String,
    pub custom_style: Option<String>,
    pub bpm: u32,
    pub output_mode: String,
    pub auto_prompt_type: Option<String>,
    pub reference_audio_id: Option<String>,
    pub model: String,
    pub memory_mode: String,
    pub cfg_coef: f64,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub extend_stride: u32,
    pub duration: Option<u32>,
}

impl Default for SongRequest {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            sections: Vec::new(),
            gender: "female".to_string(),
            timbre: String::new(),
            genre: String::new(),
            emotion: String::new(),
            instruments: String::new(),
            custom_style: None,
            bpm: 120,
            output_mode: "mixed".to_string(),
            auto_prompt_type: None,
            reference_audio_id: None,
            model: DEFAULT_MODEL.to_string(),
            memory_mode: "auto".to_string(),
            cfg_coef: 1.5,
            temperature: 0.8,
            top_k: 50,
            top_p: 0.0,
            extend_stride: 5,
            duration: None,
        }
    }
}

impl SongRequest {
    /// Total lyric characters across all sections.
    pub fn total_lyrics_len(&self) -> usize {
        self.sections.iter().map(Section::lyrics_len).sum()
    }

    pub fn has_reference(&self) -> bool {
        self.reference_audio_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

/// Response of `POST /api/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub generation_id: String,
}

/// Submission parameters echoed back by the server, plus output references
/// once the job completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetadata {
    pub title: Option<String>,
    pub model: Option<String>,
    #[serde(deserialize_with = "lenient_sections")]
    pub sections: Vec<Section>,
    pub reference_audio_id: Option<String>,
    pub num_sections: Option<usize>,
    pub total_lyrics_length: Option<usize>,
    pub genre: Option<String>,
    pub emotion: Option<String>,
    pub cover: Option<String>,
    pub generation_time_seconds: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Older servers stored a section count here instead of a list.
fn lenient_sections<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Section>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Server-side record of one song-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    /// Absent until the job has actually begun running.
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    /// Some servers echo the submission at the top level instead of (or as
    /// well as) inside `metadata`.
    #[serde(default, deserialize_with = "lenient_sections")]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub reference_audio_id: Option<String>,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl GenerationJob {
    /// Whether the job is past `pending` and the server reports a run time.
    pub fn has_started(&self) -> bool {
        self.status != JobStatus::Pending && self.elapsed_seconds.is_some()
    }

    pub fn elapsed_secs(&self) -> Option<u64> {
        self.elapsed_seconds.map(|s| s.max(0.0) as u64)
    }

    pub fn display_title(&self) -> &str {
        self.metadata
            .title
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("Untitled")
    }

    /// Creation time, accepting RFC 3339 and the naive ISO form the studio
    /// server writes.
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.naive_utc())
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
    }

    /// Sections from the metadata, else the top-level echo.
    pub fn sections(&self) -> &[Section] {
        if self.metadata.sections.is_empty() {
            &self.sections
        } else {
            &self.metadata.sections
        }
    }

    pub fn reference_audio_id(&self) -> Option<&str> {
        self.metadata
            .reference_audio_id
            .as_deref()
            .or(self.reference_audio_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Rebuild the submission this job was created from.
    pub fn reconstruct_request(&self) -> SongRequest {
        let meta = &self.metadata;

        SongRequest {
            title: self.display_title().to_string(),
            model: meta
                .model
                .clone()
                .or_else(|| self.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            sections: self.sections().to_vec(),
            reference_audio_id: self.reference_audio_id().map(str::to_string),
            genre: meta.genre.clone().unwrap_or_default(),
            emotion: meta.emotion.clone().unwrap_or_default(),
            ..SongRequest::default()
        }
    }
}

/// Sort newest-first by creation time; records without a parseable
/// timestamp go last.
pub fn sort_newest_first(jobs: &mut [GenerationJob]) {
    jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

/// First job in the list the server reports as in flight.
pub fn first_in_flight(jobs: &[GenerationJob]) -> Option<&GenerationJob> {
    jobs.iter().find(|job| job.status.is_in_flight())
}

/// A payload accepted into the server queue but not yet started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(flatten)]
    pub request: SongRequest,
}

/// Historical job durations for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTimingStats {
    pub count: u32,
    pub avg_time: Option<f64>,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    pub by_bucket: HashMap<String, Option<f64>>,
    pub avg_with_lyrics: Option<f64>,
    pub avg_without_lyrics: Option<f64>,
    pub avg_with_reference: Option<f64>,
    pub avg_without_reference: Option<f64>,
}

/// Server-aggregated timing history keyed by model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingStats {
    pub has_history: bool,
    pub models: HashMap<String, ModelTimingStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuDevice {
    pub name: String,
    pub total_gb: f64,
    pub free_gb: f64,
}

/// Hardware report from `GET /api/gpu`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuInfo {
    pub available: bool,
    pub gpu: Option<GpuDevice>,
    pub recommended_mode: Option<String>,
    pub can_run_full: bool,
    pub can_run_low: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_without_elapsed_time() {
        let json = r#"{"id":"abc","status":"pending","progress":0,"message":"Queued"}"#;
        let job: GenerationJob = serde_json::from_str(json).unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.elapsed_seconds.is_none());
        assert!(!job.has_started());
        assert_eq!(job.display_title(), "Untitled");
    }

    #[test]
    fn unknown_status_does_not_fail_parsing() {
        let json = r#"{"id":"abc","status":"warming_up"}"#;
        let job: GenerationJob = serde_json::from_str(json).unwrap();

        assert_eq!(job.status, JobStatus::Unknown);
        assert!(!job.status.is_in_flight());
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn metadata_tolerates_numeric_sections() {
        let json = r#"{"id":"abc","status":"generating","elapsed_seconds":12.7,
            "metadata":{"title":"Night Drive","sections":5,"num_sections":5}}"#;
        let job: GenerationJob = serde_json::from_str(json).unwrap();

        assert!(job.metadata.sections.is_empty());
        assert_eq!(job.metadata.num_sections, Some(5));
        assert_eq!(job.elapsed_secs(), Some(12));
        assert!(job.has_started());
    }

    #[test]
    fn reconstructs_request_from_metadata() {
        let json = r#"{"id":"abc","status":"processing","model":"songgeneration_large",
            "metadata":{"title":"Night Drive","reference_audio_id":"ref-1",
            "sections":[{"type":"verse","lyrics":"la la"},{"type":"outro-short"}]}}"#;
        let job: GenerationJob = serde_json::from_str(json).unwrap();
        let request = job.reconstruct_request();

        assert_eq!(request.title, "Night Drive");
        assert_eq!(request.model, "songgeneration_large");
        assert_eq!(request.sections.len(), 2);
        assert_eq!(request.total_lyrics_len(), 5);
        assert!(request.has_reference());
    }

    #[test]
    fn sorts_newest_first_with_mixed_timestamp_formats() {
        let mut jobs: Vec<GenerationJob> = serde_json::from_str(
            r#"[
                {"id":"old","status":"completed","created_at":"2024-03-01T10:00:00.123456"},
                {"id":"none","status":"completed"},
                {"id":"new","status":"completed","created_at":"2024-03-02T08:00:00Z"}
            ]"#,
        )
        .unwrap();

        sort_newest_first(&mut jobs);

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, ["new", "old", "none"]);
    }

    #[test]
    fn queue_item_flattens_request() {
        let json = r#"{"id":"q1","title":"Later","model":"songgeneration_base_full",
            "sections":[{"type":"chorus","lyrics":"hey"}]}"#;
        let item: QueueItem = serde_json::from_str(json).unwrap();

        assert_eq!(item.id, "q1");
        assert_eq!(item.request.title, "Later");
        assert_eq!(item.request.bpm, 120);
        assert_eq!(item.request.sections[0].kind, "chorus");
    }

    #[test]
    fn song_request_parses_from_toml() {
        let request: SongRequest = toml::from_str(
            r#"
            title = "Sunrise"
            genre = "Pop"

            [[sections]]
            type = "intro-short"

            [[sections]]
            type = "verse"
            lyrics = "morning light"
            "#,
        )
        .unwrap();

        assert_eq!(request.title, "Sunrise");
        assert_eq!(request.model, DEFAULT_MODEL);
        assert_eq!(request.sections.len(), 2);
        assert!(request.sections[0].lyrics.is_none());
        assert!(!request.has_reference());
    }
}
