//! Completion-time estimates for generation jobs.
//!
//! A per-model heuristic baseline is blended with the server's historical
//! timing averages. The more samples the server has for a model, the more
//! weight the learned value gets. Estimates are pure and deterministic.

use serde::{Deserialize, Serialize};

use super::models::{DEFAULT_MODEL, GenerationJob, Section, SongRequest, TimingStats};

/// Fallback baseline for models without a known default.
pub const DEFAULT_BASE_SECS: u64 = 180;
/// Fallback complexity cap for models without a known default.
pub const DEFAULT_MAX_ADDITIONAL_SECS: u64 = 180;
/// Flat surcharge when a reference clip is attached.
pub const REFERENCE_AUDIO_SECS: u64 = 30;
/// No estimate goes below this.
pub const MIN_ESTIMATE_SECS: u64 = 60;

/// Assumed section count for a reattached job whose metadata carries neither
/// a section list nor a count.
pub const FALLBACK_SECTION_COUNT: usize = 5;

/// Section count at which the section factor saturates (1 section = 0).
const SECTION_SPAN: f64 = 9.0;
/// Lyric characters at which the lyrics factor saturates.
const LYRICS_SPAN: f64 = 2000.0;
const SECTION_WEIGHT: f64 = 0.4;
const LYRICS_WEIGHT: f64 = 0.6;

const BASE_CONFIDENCE: f64 = 0.5;
const CONFIDENCE_PER_SAMPLE: f64 = 0.09;
const MAX_CONFIDENCE: f64 = 0.95;

/// Heuristic baseline and complexity cap for a model id.
pub fn model_defaults(model: &str) -> (u64, u64) {
    match model {
        "songgeneration_base" | "songgeneration_base_new" => (180, 180),
        "songgeneration_base_full" => (240, 240),
        "songgeneration_large" => (360, 360),
        _ => (DEFAULT_BASE_SECS, DEFAULT_MAX_ADDITIONAL_SECS),
    }
}

/// Discretized job complexity used to look up historical averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ComplexityBucket {
    pub fn from_counts(num_sections: usize, lyrics_len: usize) -> Self {
        let section_score = match num_sections {
            0..=3 => 0,
            4..=6 => 1,
            _ => 2,
        };
        let lyrics_score = match lyrics_len {
            0 => 0,
            1..=500 => 1,
            501..=1500 => 2,
            _ => 3,
        };

        match section_score + lyrics_score {
            0..=1 => Self::Low,
            2..=3 => Self::Medium,
            4 => Self::High,
            _ => Self::VeryHigh,
        }
    }

    /// Key used by the server's `by_bucket` map.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// The inputs an estimate depends on, independent of where they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobShape<'a> {
    pub model: &'a str,
    pub num_sections: usize,
    pub lyrics_len: usize,
    pub has_reference: bool,
}

impl<'a> JobShape<'a> {
    pub fn from_sections(model: &'a str, sections: &[Section], has_reference: bool) -> Self {
        Self {
            model,
            num_sections: sections.len(),
            lyrics_len: sections.iter().map(Section::lyrics_len).sum(),
            has_reference,
        }
    }

    pub fn from_request(request: &'a SongRequest) -> Self {
        Self {
            model: &request.model,
            num_sections: request.sections.len(),
            lyrics_len: request.total_lyrics_len(),
            has_reference: request.has_reference(),
        }
    }

    /// Shape of a job found on the server. Section data comes from the
    /// metadata, then the top-level echo, then the stored counts.
    pub fn from_job(job: &'a GenerationJob) -> Self {
        let meta = &job.metadata;
        let model = meta
            .model
            .as_deref()
            .or(job.model.as_deref())
            .unwrap_or(DEFAULT_MODEL);
        let has_reference = job.reference_audio_id().is_some();

        let sections = job.sections();
        if !sections.is_empty() {
            return Self::from_sections(model, sections, has_reference);
        }

        Self {
            model,
            // A stored count of zero is as good as none.
            num_sections: meta
                .num_sections
                .filter(|n| *n > 0)
                .unwrap_or(FALLBACK_SECTION_COUNT),
            lyrics_len: meta.total_lyrics_length.unwrap_or(0),
            has_reference,
        }
    }
}

/// Estimated seconds for a job with the given sections.
pub fn estimate(
    stats: Option<&TimingStats>,
    model: &str,
    sections: &[Section],
    has_reference: bool,
) -> u64 {
    estimate_shape(stats, JobShape::from_sections(model, sections, has_reference))
}

/// Estimated seconds for a job described by pre-computed counts.
///
/// Used when reattaching to jobs whose metadata only carries counts.
pub fn estimate_shape(stats: Option<&TimingStats>, shape: JobShape<'_>) -> u64 {
    let default_estimate = default_estimate(shape);

    let learned = stats.and_then(|stats| learned_estimate(stats, shape));
    let estimate = match learned {
        Some((learned, samples)) => {
            let confidence = confidence(samples);
            (learned * confidence + default_estimate as f64 * (1.0 - confidence)).round() as u64
        }
        None => default_estimate,
    };

    estimate.max(MIN_ESTIMATE_SECS)
}

/// Estimated seconds for a job already known to the server.
pub fn estimate_job(stats: Option<&TimingStats>, job: &GenerationJob) -> u64 {
    estimate_shape(stats, JobShape::from_job(job))
}

/// Baseline plus complexity surcharge, before any history is applied.
pub fn default_estimate(shape: JobShape<'_>) -> u64 {
    let (base, max_additional) = model_defaults(shape.model);

    let section_factor = ((shape.num_sections as f64 - 1.0) / SECTION_SPAN).clamp(0.0, 1.0);
    let lyrics_factor = (shape.lyrics_len as f64 / LYRICS_SPAN).clamp(0.0, 1.0);
    let complexity = SECTION_WEIGHT * section_factor + LYRICS_WEIGHT * lyrics_factor;

    let mut estimate = base + (complexity * max_additional as f64).round() as u64;
    if shape.has_reference {
        estimate += REFERENCE_AUDIO_SECS;
    }
    estimate
}

/// Weight given to the learned value for a model with `samples` records.
pub fn confidence(samples: u32) -> f64 {
    (BASE_CONFIDENCE + samples as f64 * CONFIDENCE_PER_SAMPLE).min(MAX_CONFIDENCE)
}

/// Historical average for this shape and the sample count behind it.
///
/// Preference order: matching complexity bucket, lyrics-presence average,
/// overall model average. Zero or missing averages are skipped.
fn learned_estimate(stats: &TimingStats, shape: JobShape<'_>) -> Option<(f64, u32)> {
    if !stats.has_history {
        return None;
    }
    let model = stats.models.get(shape.model)?;
    let bucket = ComplexityBucket::from_counts(shape.num_sections, shape.lyrics_len);
    let has_lyrics = shape.lyrics_len > 0;

    let lyrics_average = if has_lyrics {
        model.avg_with_lyrics
    } else {
        model.avg_without_lyrics
    };

    let mut learned = model
        .by_bucket
        .get(bucket.as_str())
        .copied()
        .flatten()
        .filter(|v| usable(*v))
        .or(lyrics_average.filter(|v| usable(*v)))
        .or(model.avg_time.filter(|v| usable(*v)))?;

    if shape.has_reference {
        if let (Some(with), Some(without)) = (model.avg_with_reference, model.avg_without_reference) {
            if usable(with) && usable(without) {
                learned = (learned * with / without).round();
            }
        }
    }

    Some((learned, model.count))
}

fn usable(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Format seconds as `M:SS`.
pub fn format_eta(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ModelTimingStats;
    use std::collections::HashMap;

    fn sections(count: usize, lyrics_each: usize) -> Vec<Section> {
        (0..count)
            .map(|_| Section {
                kind: "verse".to_string(),
                lyrics: Some("a".repeat(lyrics_each)),
            })
            .collect()
    }

    fn stats_with(model: &str, model_stats: ModelTimingStats) -> TimingStats {
        TimingStats {
            has_history: true,
            models: HashMap::from([(model.to_string(), model_stats)]),
        }
    }

    #[test]
    fn single_empty_section_uses_model_baseline() {
        let eta = estimate(None, "songgeneration_base", &sections(1, 0), false);
        assert_eq!(eta, 180);
        assert_eq!(format_eta(eta), "3:00");
    }

    #[test]
    fn complexity_adds_to_baseline() {
        // 5 sections with 200 chars each = 1000 lyric characters
        let eta = estimate(None, "songgeneration_base", &sections(5, 200), false);
        assert_eq!(eta, 266);
        assert_eq!(format_eta(eta), "4:26");
    }

    #[test]
    fn reference_audio_adds_flat_surcharge() {
        let without = estimate(None, "songgeneration_large", &sections(1, 0), false);
        let with = estimate(None, "songgeneration_large", &sections(1, 0), true);
        assert_eq!(without, 360);
        assert_eq!(with, 390);
    }

    #[test]
    fn unknown_model_falls_back_to_defaults() {
        assert_eq!(estimate(None, "custom", &sections(1, 0), false), 180);
        assert_eq!(estimate(None, "custom", &sections(10, 200), false), 360);
    }

    #[test]
    fn bucket_history_blends_with_default() {
        let stats = stats_with(
            "songgeneration_base",
            ModelTimingStats {
                count: 5,
                by_bucket: HashMap::from([("medium".to_string(), Some(200.0))]),
                avg_time: Some(500.0),
                ..Default::default()
            },
        );
        // bucket: 5 sections (1) + 1000 chars (2) = medium; default is 266
        let eta = estimate(Some(&stats), "songgeneration_base", &sections(5, 200), false);
        assert_eq!(eta, (200.0_f64 * 0.95 + 266.0 * 0.05).round() as u64);
        assert_eq!(eta, 203);
    }

    #[test]
    fn falls_back_to_lyrics_average_then_overall() {
        let lyrics_stats = stats_with(
            "songgeneration_base",
            ModelTimingStats {
                count: 10,
                avg_without_lyrics: Some(100.0),
                avg_time: Some(400.0),
                ..Default::default()
            },
        );
        // 100 * 0.95 + 180 * 0.05 = 104
        assert_eq!(
            estimate(Some(&lyrics_stats), "songgeneration_base", &sections(1, 0), false),
            104
        );

        let overall_stats = stats_with(
            "songgeneration_base",
            ModelTimingStats {
                count: 0,
                avg_time: Some(300.0),
                ..Default::default()
            },
        );
        // 300 * 0.5 + 180 * 0.5 = 240
        assert_eq!(
            estimate(Some(&overall_stats), "songgeneration_base", &sections(1, 0), false),
            240
        );
    }

    #[test]
    fn reference_ratio_scales_learned_value() {
        let stats = stats_with(
            "songgeneration_base",
            ModelTimingStats {
                count: 0,
                avg_time: Some(200.0),
                avg_with_reference: Some(300.0),
                avg_without_reference: Some(200.0),
                ..Default::default()
            },
        );
        // learned 200 * 1.5 = 300; default 180 + 30 = 210; 300 * 0.5 + 210 * 0.5 = 255
        let eta = estimate(Some(&stats), "songgeneration_base", &sections(1, 0), true);
        assert_eq!(eta, 255);
    }

    #[test]
    fn history_for_other_model_is_ignored() {
        let stats = stats_with(
            "songgeneration_large",
            ModelTimingStats {
                count: 10,
                avg_time: Some(900.0),
                ..Default::default()
            },
        );
        assert_eq!(
            estimate(Some(&stats), "songgeneration_base", &sections(1, 0), false),
            180
        );
    }

    #[test]
    fn never_below_floor() {
        let stats = stats_with(
            "songgeneration_base",
            ModelTimingStats {
                count: 50,
                avg_time: Some(5.0),
                ..Default::default()
            },
        );
        assert_eq!(
            estimate(Some(&stats), "songgeneration_base", &[], false),
            MIN_ESTIMATE_SECS
        );
    }

    #[test]
    fn default_path_is_monotonic() {
        let mut previous = 0;
        for count in 0..15 {
            let eta = estimate(None, "songgeneration_base_full", &sections(count, 0), false);
            assert!(eta >= previous);
            previous = eta;
        }

        let mut previous = 0;
        for lyrics in (0..3000).step_by(50) {
            let shape = JobShape {
                model: "songgeneration_base_full",
                num_sections: 4,
                lyrics_len: lyrics,
                has_reference: false,
            };
            let eta = estimate_shape(None, shape);
            assert!(eta >= previous);
            previous = eta;
        }
    }

    #[test]
    fn reattached_job_shape_comes_from_metadata() {
        let job: GenerationJob = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "status": "generating",
            "metadata": {
                "model": "songgeneration_large",
                "reference_audio_id": "ref-1",
                "sections": [{"type": "verse", "lyrics": "abcd"}, {"type": "outro"}]
            }
        }))
        .unwrap();

        let shape = JobShape::from_job(&job);
        assert_eq!(shape.model, "songgeneration_large");
        assert_eq!(shape.num_sections, 2);
        assert_eq!(shape.lyrics_len, 4);
        assert!(shape.has_reference);
    }

    #[test]
    fn reattached_job_without_sections_uses_counts() {
        let bare: GenerationJob =
            serde_json::from_value(serde_json::json!({"id": "a", "status": "pending"})).unwrap();
        let shape = JobShape::from_job(&bare);
        assert_eq!(shape.model, DEFAULT_MODEL);
        assert_eq!(shape.num_sections, FALLBACK_SECTION_COUNT);
        assert_eq!(shape.lyrics_len, 0);
        // 180 + round(0.4 * 4/9 * 180) = 212
        assert_eq!(estimate_job(None, &bare), 212);

        let counted: GenerationJob = serde_json::from_value(serde_json::json!({
            "id": "b",
            "status": "pending",
            "metadata": {"num_sections": 1, "total_lyrics_length": 2000}
        }))
        .unwrap();
        // 180 + round(0.6 * 180) = 288
        assert_eq!(estimate_job(None, &counted), 288);
    }

    #[test]
    fn reattached_job_falls_back_to_top_level_echo() {
        let job: GenerationJob = serde_json::from_value(serde_json::json!({
            "id": "c",
            "status": "generating",
            "reference_audio_id": "ref-9",
            "sections": [{"type": "verse", "lyrics": "la la"}, {"type": "chorus"}, {"type": "outro"}],
            "metadata": {"title": "Echo"}
        }))
        .unwrap();

        let shape = JobShape::from_job(&job);
        assert_eq!(shape.num_sections, 3);
        assert_eq!(shape.lyrics_len, 5);
        assert!(shape.has_reference);
        assert_eq!(job.reconstruct_request().sections.len(), 3);
    }

    #[test]
    fn zero_section_count_means_unknown() {
        let job: GenerationJob = serde_json::from_value(serde_json::json!({
            "id": "d",
            "status": "pending",
            "metadata": {"num_sections": 0}
        }))
        .unwrap();

        assert_eq!(JobShape::from_job(&job).num_sections, FALLBACK_SECTION_COUNT);
        assert_eq!(estimate_job(None, &job), 212);
    }

    #[test]
    fn confidence_saturates() {
        assert_eq!(confidence(0), 0.5);
        assert!((confidence(3) - 0.77).abs() < 1e-9);
        assert_eq!(confidence(100), 0.95);
    }

    #[test]
    fn buckets_follow_score_table() {
        assert_eq!(ComplexityBucket::from_counts(3, 0), ComplexityBucket::Low);
        assert_eq!(ComplexityBucket::from_counts(3, 500), ComplexityBucket::Low);
        assert_eq!(ComplexityBucket::from_counts(4, 500), ComplexityBucket::Medium);
        assert_eq!(ComplexityBucket::from_counts(7, 600), ComplexityBucket::High);
        assert_eq!(ComplexityBucket::from_counts(7, 1501), ComplexityBucket::VeryHigh);
        assert_eq!(ComplexityBucket::VeryHigh.as_str(), "very_high");
    }

    #[test]
    fn formats_eta() {
        assert_eq!(format_eta(0), "0:00");
        assert_eq!(format_eta(65), "1:05");
        assert_eq!(format_eta(754), "12:34");
    }
}
