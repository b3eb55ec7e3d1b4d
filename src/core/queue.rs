//! Client-side projection of the server queue.
//!
//! The server promotes a queued item into the job list a moment before the
//! client refreshes its queue, so the same id can briefly be both "queued"
//! and "running". Items already in flight are filtered out here.

use std::collections::HashSet;

use serde::Serialize;

use super::models::{GenerationJob, QueueItem};

/// A queued item with its 1-based run position (1 runs next).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub position: usize,
    pub item: QueueItem,
}

/// Ids that must not show up as queued: the tracked job plus every job the
/// server reports as pending, generating or processing.
pub fn in_flight_ids<'a>(
    current_job_id: Option<&'a str>,
    library: &'a [GenerationJob],
) -> HashSet<&'a str> {
    library
        .iter()
        .filter(|job| job.status.is_in_flight())
        .map(|job| job.id.as_str())
        .chain(current_job_id)
        .collect()
}

/// Queue items not already in flight, in stored (oldest-first) order.
pub fn pending_items<'a>(queue: &'a [QueueItem], in_flight: &HashSet<&str>) -> Vec<&'a QueueItem> {
    queue
        .iter()
        .filter(|item| !in_flight.contains(item.id.as_str()))
        .collect()
}

/// Display order for the queue: newest first, numbered so that the oldest
/// item (the next one the server promotes) has position 1.
pub fn display_queue(
    queue: &[QueueItem],
    current_job_id: Option<&str>,
    library: &[GenerationJob],
) -> Vec<QueueEntry> {
    let in_flight = in_flight_ids(current_job_id, library);
    let pending = pending_items(queue, &in_flight);
    let total = pending.len();

    pending
        .into_iter()
        .rev()
        .enumerate()
        .map(|(idx, item)| QueueEntry {
            position: total - idx,
            item: item.clone(),
        })
        .collect()
}

/// Songs still to come: the tracked one (if any) plus everything queued.
pub fn pending_count(has_current: bool, queue_len: usize) -> usize {
    usize::from(has_current) + queue_len
}
