//! Plain-text rendering of tracker state for the terminal.

use std::fmt::Write;

use crate::core::catalog::{ModelCatalog, ModelStatus};
use crate::core::estimator::format_eta;
use crate::core::events::{JobOutcome, TrackerEvent};
use crate::core::models::{GenerationJob, GpuInfo, JobStatus};
use crate::core::progress::GenerationSnapshot;
use crate::core::queue::QueueEntry;
use crate::core::tracker::Phase;

const BAR_WIDTH: usize = 25;

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn progress_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

fn status_icon(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "✓",
        JobStatus::Failed => "✗",
        JobStatus::Stopped => "■",
        _ => "•",
    }
}

/// One line describing the tracked job, or the idle state.
pub fn current_line(snapshot: &GenerationSnapshot) -> String {
    match snapshot.phase {
        Phase::Idle => "Idle".to_string(),
        Phase::AwaitingNext => "Waiting for the next queued song...".to_string(),
        Phase::Starting => format!(
            "▶ {}  Starting...  ETA {}",
            snapshot.title.as_deref().unwrap_or("Untitled"),
            snapshot.estimated_secs.map(format_eta).unwrap_or_default()
        ),
        Phase::Running => {
            let id = snapshot.job_id.as_deref().map(short_id).unwrap_or_default();
            let title = snapshot.title.as_deref().unwrap_or("Untitled");
            let bar = progress_bar(snapshot.eta_fraction().unwrap_or(0.0), BAR_WIDTH);
            let eta = snapshot
                .estimated_secs
                .map(format_eta)
                .unwrap_or_else(|| "?".to_string());
            let message = snapshot.message.as_deref().unwrap_or("Generating...");

            format!(
                "▶ {id}  {title}  {bar} {} / {eta}  {message}",
                format_eta(snapshot.elapsed_secs)
            )
        }
    }
}

pub fn queue_lines(queue: &[QueueEntry]) -> Vec<String> {
    queue
        .iter()
        .map(|entry| {
            format!(
                "  #{}  {}  {}  ({})",
                entry.position,
                short_id(&entry.item.id),
                entry.item.request.title,
                entry.item.request.model
            )
        })
        .collect()
}

pub fn library_lines(jobs: &[GenerationJob], limit: usize) -> Vec<String> {
    jobs.iter()
        .take(limit)
        .map(|job| {
            let created = job
                .created_at()
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "  {} {}  {}  {:<10}  {}",
                status_icon(job.status),
                short_id(&job.id),
                created,
                job.status,
                job.display_title()
            )
        })
        .collect()
}

/// Full `status` report.
pub fn status_report(snapshot: &GenerationSnapshot, library_limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", current_line(snapshot));
    if let (Phase::Running, Some(remaining)) = (snapshot.phase, snapshot.remaining_secs()) {
        let _ = writeln!(out, "About {} left", format_eta(remaining));
    }
    if let Some(err) = &snapshot.last_error {
        let _ = writeln!(out, "Last error: {err}");
    }

    let _ = writeln!(out, "\nQueue ({} pending)", snapshot.pending_songs());
    if snapshot.queue.is_empty() {
        let _ = writeln!(out, "  Queue is empty");
    }
    for line in queue_lines(&snapshot.queue) {
        let _ = writeln!(out, "{line}");
    }

    let _ = writeln!(out, "\nRecent generations");
    if snapshot.library.is_empty() {
        let _ = writeln!(out, "  No generations yet");
    }
    for line in library_lines(&snapshot.library, library_limit) {
        let _ = writeln!(out, "{line}");
    }
    out
}

pub fn model_lines(catalog: &ModelCatalog) -> Vec<String> {
    catalog
        .models
        .iter()
        .map(|model| {
            let state = match model.status {
                ModelStatus::Ready => "ready".to_string(),
                ModelStatus::Downloading => {
                    format!("downloading {:.0}%", model.progress.unwrap_or(0.0))
                }
                ModelStatus::NotDownloaded => "not downloaded".to_string(),
                ModelStatus::Unknown => "unknown".to_string(),
            };
            let recommended = if catalog.recommended.as_deref() == Some(model.id.as_str()) {
                "  (recommended)"
            } else {
                ""
            };
            format!(
                "  {:<26} {:<18} {:>6} GB  {:>5} GB VRAM{recommended}",
                model.id,
                state,
                model.size_gb.map(|s| format!("{s:.1}")).unwrap_or_default(),
                model.vram_required.map(|v| format!("{v:.0}")).unwrap_or_default(),
            )
        })
        .collect()
}

pub fn gpu_report(info: Option<&GpuInfo>) -> String {
    let Some(info) = info else {
        return "GPU info unavailable".to_string();
    };
    match &info.gpu {
        Some(gpu) if info.available => format!(
            "{}: {:.1} GB free / {:.1} GB total (mode: {})",
            gpu.name,
            gpu.free_gb,
            gpu.total_gb,
            info.recommended_mode.as_deref().unwrap_or("auto")
        ),
        _ => "No GPU available".to_string(),
    }
}

/// Human-readable line for a tracker event; `None` for events not worth
/// printing on their own.
pub fn event_line(event: &TrackerEvent) -> Option<String> {
    match event {
        TrackerEvent::Attached {
            job_id,
            title,
            estimated_secs,
            reconnected,
        } => Some(format!(
            "{} {}  {}  (ETA {})",
            if *reconnected { "Reconnected to" } else { "Tracking" },
            short_id(job_id),
            title,
            format_eta(*estimated_secs)
        )),
        TrackerEvent::Finished { job_id, outcome } => Some(match outcome {
            JobOutcome::Completed => format!("✓ {}  Completed", short_id(job_id)),
            JobOutcome::Stopped => format!("■ {}  Stopped", short_id(job_id)),
            JobOutcome::Vanished => format!("• {}  No longer on the server", short_id(job_id)),
            JobOutcome::Failed { message } => format!("✗ {}  Failed: {message}", short_id(job_id)),
        }),
        TrackerEvent::Queued { title } => Some(format!("Queued: {title}")),
        TrackerEvent::Error { message } => Some(format!("Error: {message}")),
        TrackerEvent::PhaseChanged { .. } | TrackerEvent::Progress { .. } => None,
    }
}
