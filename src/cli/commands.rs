use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::payload::{apply_overrides, load_request};
use super::render;
use crate::context::AppContext;
use crate::core::catalog::ModelStatus;
use crate::core::estimator::{self, JobShape, format_eta};
use crate::core::events::TrackerEvent;
use crate::core::models::first_in_flight;
use crate::core::queue::display_queue;
use crate::core::tracker::{self, Phase, SubmitOutcome, TrackerHandle};
use crate::logging::LogThrottle;

const LIBRARY_LIMIT: usize = 10;
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);
const MODEL_DOWNLOAD_POLL: Duration = Duration::from_secs(5);

/// Spawn a tracker that has already reconnected to the server.
async fn start_tracker(ctx: &AppContext) -> (TrackerHandle, tokio::task::JoinHandle<()>) {
    let mut tracker = ctx.tracker();
    tracker.init(ctx.config.auto_download).await;
    tracker::spawn(tracker, ctx.config.cadence(), CancellationToken::new())
}

async fn stop_tracker(handle: TrackerHandle, task: tokio::task::JoinHandle<()>) {
    handle.shutdown();
    if let Err(e) = task.await {
        warn!(error = %e, "Tracker task ended abnormally");
    }
}

/// Follow tracker events until Ctrl-C, or until the tracker settles idle
/// when `exit_when_idle` is set.
async fn follow(handle: &TrackerHandle, exit_when_idle: bool) -> Result<()> {
    let mut events = handle.subscribe();
    let throttle = LogThrottle::new(PROGRESS_LOG_INTERVAL);

    let snapshot = handle.snapshot().await;
    println!("{}", render::current_line(&snapshot));
    if exit_when_idle && snapshot.phase == Phase::Idle {
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(TrackerEvent::Progress { job_id, status, progress, elapsed_secs, .. }) => {
                    if throttle.should_log() {
                        info!(
                            job_id = %render::short_id(&job_id),
                            status = %status,
                            progress = progress.unwrap_or(0.0),
                            elapsed = %format_eta(elapsed_secs),
                            "Generating"
                        );
                    }
                }
                Ok(TrackerEvent::PhaseChanged { phase: Phase::Idle }) if exit_when_idle => {
                    let snapshot = handle.snapshot().await;
                    if snapshot.queue.is_empty() {
                        println!("All generations finished");
                        return Ok(());
                    }
                }
                Ok(event) => {
                    if let Some(line) = render::event_line(&event) {
                        println!("{line}");
                    }
                    if matches!(event, TrackerEvent::Attached { .. }) {
                        throttle.reset();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

pub async fn watch(ctx: &AppContext, exit_when_idle: bool) -> Result<()> {
    let (handle, task) = start_tracker(ctx).await;
    let result = follow(&handle, exit_when_idle).await;
    stop_tracker(handle, task).await;
    result
}

pub async fn generate(
    ctx: &AppContext,
    path: &Path,
    model: Option<&str>,
    title: Option<&str>,
    watch: bool,
) -> Result<()> {
    let mut request = load_request(path)?;
    apply_overrides(&mut request, model, title);

    let (handle, task) = start_tracker(ctx).await;
    let outcome = handle.submit(request).await;

    let result = match outcome {
        Ok(SubmitOutcome::Started {
            job_id,
            estimated_secs,
        }) => {
            println!(
                "Started {}  (ETA {})",
                render::short_id(&job_id),
                format_eta(estimated_secs)
            );
            Ok(())
        }
        Ok(SubmitOutcome::Queued) => {
            let snapshot = handle.snapshot().await;
            println!("Added to queue ({} pending)", snapshot.pending_songs());
            Ok(())
        }
        Ok(SubmitOutcome::Reconciled { job_id }) => {
            match job_id {
                Some(id) => println!(
                    "The server is already generating {}; now tracking it",
                    render::short_id(&id)
                ),
                None => println!("The server reported a generation in progress"),
            }
            Ok(())
        }
        Err(e) => Err(e).context("Failed to submit generation"),
    };

    let result = match result {
        Ok(()) if watch => follow(&handle, true).await,
        other => other,
    };
    stop_tracker(handle, task).await;
    result
}

pub async fn status(ctx: &AppContext) -> Result<()> {
    let mut tracker = ctx.tracker();
    tracker.init(false).await;
    print!("{}", render::status_report(&tracker.snapshot(), LIBRARY_LIMIT));
    Ok(())
}

pub async fn estimate(ctx: &AppContext, path: &Path, offline: bool) -> Result<()> {
    let request = load_request(path)?;

    let stats = if offline {
        None
    } else {
        match ctx.api.timing_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Timing stats unavailable, using model defaults");
                None
            }
        }
    };

    let shape = JobShape::from_request(&request);
    let eta = estimator::estimate_shape(stats.as_ref(), shape);
    println!(
        "{}  ({}, {} sections, {} lyric chars{})",
        format_eta(eta),
        shape.model,
        shape.num_sections,
        shape.lyrics_len,
        if shape.has_reference { ", reference audio" } else { "" }
    );
    Ok(())
}

pub async fn stop(ctx: &AppContext, id: Option<&str>) -> Result<()> {
    let id = match id {
        Some(id) => id.to_string(),
        None => {
            let library = ctx
                .api
                .list_generations()
                .await
                .context("Failed to load generations")?;
            match first_in_flight(&library) {
                Some(job) => job.id.clone(),
                None => {
                    println!("Nothing is running");
                    return Ok(());
                }
            }
        }
    };

    ctx.api
        .stop_generation(&id)
        .await
        .with_context(|| format!("Failed to stop {id}"))?;
    println!("Stop requested for {}", render::short_id(&id));
    Ok(())
}

pub async fn delete(ctx: &AppContext, id: &str) -> Result<()> {
    if !ctx.api.delete_generation(id).await? {
        bail!("Server refused to delete {id}");
    }
    println!("Deleted {}", render::short_id(id));
    Ok(())
}

pub async fn rename(ctx: &AppContext, id: &str, title: &str) -> Result<()> {
    ctx.api
        .rename_generation(id, title)
        .await
        .with_context(|| format!("Failed to rename {id}"))?;
    println!("Renamed {} to {title}", render::short_id(id));
    Ok(())
}

pub async fn download(
    ctx: &AppContext,
    id: &str,
    track: u32,
    format: Option<&str>,
    output: Option<PathBuf>,
) -> Result<()> {
    let bytes = ctx
        .api
        .download_track(id, track, format)
        .await
        .with_context(|| format!("Failed to download track {track} of {id}"))?;

    let output = output.unwrap_or_else(|| {
        PathBuf::from(format!("{id}_{track}.{}", format.unwrap_or("flac")))
    });
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Saved {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

pub async fn queue_list(ctx: &AppContext) -> Result<()> {
    let (library, queue) = tokio::try_join!(ctx.api.list_generations(), ctx.api.list_queue())?;
    let current = first_in_flight(&library).map(|job| job.id.as_str());
    let entries = display_queue(&queue, current, &library);

    if entries.is_empty() {
        println!("Queue is empty");
    }
    for line in render::queue_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn queue_remove(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.api
        .remove_from_queue(id)
        .await
        .with_context(|| format!("Failed to remove {id} from the queue"))?;
    println!("Removed {} from the queue", render::short_id(id));
    queue_list(ctx).await
}

pub async fn models_list(ctx: &AppContext) -> Result<()> {
    let catalog = ctx.api.list_models().await.context("Failed to load models")?;
    for line in render::model_lines(&catalog) {
        println!("{line}");
    }
    if !catalog.has_ready_model {
        println!("No models downloaded.");
    }
    Ok(())
}

pub async fn models_download(ctx: &AppContext, model_id: &str, wait: bool) -> Result<()> {
    if !ctx.api.start_model_download(model_id).await? {
        bail!("Server refused to download {model_id}");
    }
    println!("Downloading {model_id}");
    if !wait {
        return Ok(());
    }

    let mut interval = tokio::time::interval(MODEL_DOWNLOAD_POLL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = interval.tick() => {}
        }

        let catalog = match ctx.api.list_models().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Failed to refresh models");
                continue;
            }
        };
        let Some(model) = catalog.models.iter().find(|m| m.id == model_id) else {
            bail!("Model {model_id} is not known to the server");
        };

        match model.status {
            ModelStatus::Downloading => {
                info!(model = %model_id, progress = model.progress.unwrap_or(0.0), "Downloading");
            }
            ModelStatus::Ready => {
                println!("{model_id} is ready");
                return Ok(());
            }
            ModelStatus::NotDownloaded | ModelStatus::Unknown => {
                bail!("Download of {model_id} did not complete");
            }
        }
    }
}

pub async fn models_cancel(ctx: &AppContext, model_id: &str) -> Result<()> {
    ctx.api.cancel_model_download(model_id).await?;
    println!("Cancelled download of {model_id}");
    Ok(())
}

pub async fn models_delete(ctx: &AppContext, model_id: &str) -> Result<()> {
    if !ctx.api.delete_model(model_id).await? {
        bail!("Server refused to delete {model_id}");
    }
    println!("Deleted {model_id}");
    Ok(())
}

pub async fn gpu(ctx: &AppContext) -> Result<()> {
    let info = ctx.api.gpu_info().await.context("Failed to query GPU")?;
    println!("{}", render::gpu_report(info.as_ref()));
    Ok(())
}
