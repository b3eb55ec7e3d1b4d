//! Task that owns a [`Tracker`] and drives its timers.
//!
//! Which timers exist is derived from the tracker state before every
//! `select!`, so a timer only runs while its state does: the status poll and
//! ticker while `Running`, the short "next job" poll while `AwaitingNext`,
//! and the consistency sweep always.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{SubmitOutcome, Tracker, TrackerError, TrackerState};
use crate::core::events::TrackerEvent;
use crate::core::models::SongRequest;
use crate::core::progress::{GenerationSnapshot, ProgressBoard};

const COMMAND_CAPACITY: usize = 32;

/// Timer periods for the tracker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub tick: Duration,
    pub poll: Duration,
    pub queue_wait: Duration,
    pub sweep: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            poll: Duration::from_secs(2),
            queue_wait: Duration::from_secs(1),
            sweep: Duration::from_secs(10),
        }
    }
}

enum Command {
    Submit {
        request: SongRequest,
        reply: oneshot::Sender<Result<SubmitOutcome, TrackerError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<Option<String>, TrackerError>>,
    },
    RemoveQueued {
        id: String,
        reply: oneshot::Sender<Result<(), TrackerError>>,
    },
    Refresh,
}

/// Cloneable handle to a running tracker task.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Command>,
    board: ProgressBoard,
    events: broadcast::Sender<TrackerEvent>,
    cancel: CancellationToken,
}

impl TrackerHandle {
    pub async fn submit(&self, request: SongRequest) -> Result<SubmitOutcome, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { request, reply }).await?;
        rx.await.map_err(|_| TrackerError::Closed)?
    }

    /// Request a stop of the tracked job; returns its id if there was one.
    pub async fn stop(&self) -> Result<Option<String>, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| TrackerError::Closed)?
    }

    pub async fn remove_queued(&self, id: &str) -> Result<(), TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RemoveQueued {
            id: id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| TrackerError::Closed)?
    }

    pub async fn refresh(&self) -> Result<(), TrackerError> {
        self.send(Command::Refresh).await
    }

    pub async fn snapshot(&self) -> GenerationSnapshot {
        self.board.get().await
    }

    pub fn board(&self) -> ProgressBoard {
        self.board.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.tx.send(command).await.map_err(|_| TrackerError::Closed)
    }
}

/// Move `tracker` into its own task. The task ends when `cancel` fires or
/// every handle is dropped.
pub fn spawn(
    tracker: Tracker,
    cadence: Cadence,
    cancel: CancellationToken,
) -> (TrackerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let handle = TrackerHandle {
        tx,
        board: tracker.board(),
        events: tracker.event_sender(),
        cancel: cancel.clone(),
    };

    let task = tokio::spawn(run(tracker, rx, cadence, cancel));
    (handle, task)
}

async fn run(
    mut tracker: Tracker,
    mut rx: mpsc::Receiver<Command>,
    cadence: Cadence,
    cancel: CancellationToken,
) {
    let mut timers = Timers::default();

    loop {
        timers.sync(tracker.state(), &cadence);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Tracker task shutting down");
                break;
            }
            command = rx.recv() => match command {
                Some(command) => handle(&mut tracker, command).await,
                None => break,
            },
            _ = fire(&mut timers.poll) => tracker.poll_current().await,
            _ = fire(&mut timers.tick) => tracker.tick(cadence.tick).await,
            _ = fire(&mut timers.queue_wait) => tracker.poll_next().await,
            _ = fire(&mut timers.sweep) => tracker.sweep().await,
        }
    }
}

async fn handle(tracker: &mut Tracker, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Submit { request, reply } => {
            let _ = reply.send(tracker.submit(request).await);
        }
        Command::Stop { reply } => {
            let _ = reply.send(tracker.stop_current().await);
        }
        Command::RemoveQueued { id, reply } => {
            let _ = reply.send(tracker.remove_queued(&id).await);
        }
        Command::Refresh => tracker.refresh().await,
    }
}

#[derive(Default)]
struct Timers {
    tick: Option<Interval>,
    poll: Option<Interval>,
    queue_wait: Option<Interval>,
    sweep: Option<Interval>,
}

impl Timers {
    fn sync(&mut self, state: &TrackerState, cadence: &Cadence) {
        toggle(&mut self.poll, state.polls_job(), cadence.poll);
        toggle(&mut self.tick, state.ticks(), cadence.tick);
        toggle(&mut self.queue_wait, state.awaits_next(), cadence.queue_wait);
        toggle(&mut self.sweep, true, cadence.sweep);
    }
}

/// Create or drop a timer. An existing timer keeps its phase.
fn toggle(slot: &mut Option<Interval>, wanted: bool, period: Duration) {
    match (wanted, slot.is_some()) {
        (true, false) => {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *slot = Some(interval);
        }
        (false, true) => *slot = None,
        _ => {}
    }
}

/// Resolves on the timer's next tick; never resolves without a timer.
async fn fire(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
