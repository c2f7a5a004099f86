use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cipherpart_protocol::sizing::Layout;
use cipherpart_queue::PauseGate;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::TransferError;
use crate::progress::{ProgressSnapshot, SpeedCalculator, TransferEvent};

/// Capacity of a session's event channel. Events beyond it are dropped.
const EVENT_CAPACITY: usize = 256;

/// Direction of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

/// Lifecycle state of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Running,
    Paused,
    Done,
    Errored,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }
}

#[derive(Debug, Default)]
struct Flags {
    started: bool,
    done: bool,
    errored: bool,
    cancelled: bool,
}

impl Flags {
    fn terminal(&self) -> bool {
        self.done || self.errored || self.cancelled
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_bytes: AtomicU64,
    total_blocks: AtomicU64,
    total_parts: AtomicU64,
    bytes: AtomicU64,
    blocks: AtomicU64,
    parts: AtomicU64,
}

/// State shared by every stage of one session.
///
/// Holds the lifecycle flags, the pause gate, the halt token that stops
/// scheduling, progress counters and the single terminal outcome.
pub(crate) struct SessionCore {
    id: String,
    kind: TransferKind,
    gate: PauseGate,
    /// Fires on user cancel or on the first fatal error.
    halt: CancellationToken,
    flags: Mutex<Flags>,
    counters: Counters,
    speed: SpeedCalculator,
    outcome: watch::Sender<Option<Result<(), TransferError>>>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionCore {
    pub(crate) fn new(kind: TransferKind) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (outcome, _) = watch::channel(None);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            gate: PauseGate::new(),
            halt: CancellationToken::new(),
            flags: Mutex::new(Flags::default()),
            counters: Counters::default(),
            speed: SpeedCalculator::default(),
            outcome,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        lock(&self.events_rx).take()
    }

    pub(crate) fn set_layout(&self, layout: &Layout) {
        let c = &self.counters;
        c.total_bytes.store(layout.size, Ordering::Relaxed);
        c.total_blocks.store(layout.blocks, Ordering::Relaxed);
        c.total_parts.store(layout.parts, Ordering::Relaxed);
    }

    pub(crate) fn mark_started(&self) {
        lock(&self.flags).started = true;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        lock(&self.flags).cancelled
    }

    /// True once the session was cancelled or failed.
    pub(crate) fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    /// The error that halted the session.
    pub(crate) fn halt_error(&self) -> TransferError {
        match &*self.outcome.borrow() {
            Some(Err(e)) => e.clone(),
            _ => TransferError::Cancelled,
        }
    }

    /// Runs `fut` unless the session halts first.
    pub(crate) async fn unless_halted<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.halt.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Awaited at the start of every work phase: blocks while paused and
    /// fails once the session has halted.
    pub(crate) async fn checkpoint(&self) -> Result<(), TransferError> {
        if self.unless_halted(self.gate.wait()).await.is_none() || self.is_halted() {
            return Err(self.halt_error());
        }
        Ok(())
    }

    pub(crate) fn pause(&self) {
        if !lock(&self.flags).terminal() {
            self.gate.pause();
        }
    }

    pub(crate) fn unpause(&self) {
        if !lock(&self.flags).terminal() {
            self.gate.unpause();
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Records a fatal error. Only the first terminal transition counts.
    pub(crate) fn fail(&self, err: TransferError) {
        {
            let mut flags = lock(&self.flags);
            if flags.terminal() {
                return;
            }
            flags.errored = true;
        }
        error!(session = %self.id, error = %err, "transfer failed");
        self.outcome.send_replace(Some(Err(err.clone())));
        self.gate.pause();
        self.halt.cancel();
        self.emit(TransferEvent::Failed {
            session_id: self.id.clone(),
            error: err.to_string(),
        });
    }

    /// Stops scheduling new work. In-flight calls finish and are discarded.
    pub(crate) fn cancel(&self) {
        {
            let mut flags = lock(&self.flags);
            if flags.terminal() {
                return;
            }
            flags.cancelled = true;
        }
        info!(session = %self.id, "transfer cancelled");
        self.outcome.send_replace(Some(Err(TransferError::Cancelled)));
        self.halt.cancel();
        self.emit(TransferEvent::Cancelled {
            session_id: self.id.clone(),
        });
    }

    pub(crate) fn finish(&self) {
        {
            let mut flags = lock(&self.flags);
            if flags.terminal() {
                return;
            }
            flags.done = true;
        }
        info!(
            session = %self.id,
            bytes = self.counters.bytes.load(Ordering::Relaxed),
            "transfer complete"
        );
        self.outcome.send_replace(Some(Ok(())));
        self.emit(TransferEvent::Completed {
            session_id: self.id.clone(),
        });
    }

    /// Waits for the terminal outcome.
    pub(crate) async fn result(&self) -> Result<(), TransferError> {
        let mut rx = self.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(TransferError::Cancelled)),
            Err(_) => Err(TransferError::Cancelled),
        }
    }

    /// Adds committed work to the counters. A committed part also emits a
    /// progress event.
    pub(crate) fn advance(&self, bytes: u64, blocks: u64, parts: u64) {
        let c = &self.counters;
        c.bytes.fetch_add(bytes, Ordering::Relaxed);
        c.blocks.fetch_add(blocks, Ordering::Relaxed);
        c.parts.fetch_add(parts, Ordering::Relaxed);
        if bytes > 0 {
            self.speed.add_sample(bytes);
        }
        if parts > 0 {
            self.emit(TransferEvent::Progress(self.snapshot()));
        }
    }

    pub(crate) fn state(&self) -> TransferState {
        let flags = lock(&self.flags);
        if flags.done {
            TransferState::Done
        } else if flags.errored {
            TransferState::Errored
        } else if flags.cancelled {
            TransferState::Cancelled
        } else if !flags.started {
            TransferState::Pending
        } else if self.gate.is_paused() {
            TransferState::Paused
        } else {
            TransferState::Running
        }
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let c = &self.counters;
        ProgressSnapshot {
            session_id: self.id.clone(),
            kind: self.kind,
            state: self.state(),
            total_bytes: c.total_bytes.load(Ordering::Relaxed),
            completed_bytes: c.bytes.load(Ordering::Relaxed),
            total_blocks: c.total_blocks.load(Ordering::Relaxed),
            completed_blocks: c.blocks.load(Ordering::Relaxed),
            total_parts: c.total_parts.load(Ordering::Relaxed),
            completed_parts: c.parts.load(Ordering::Relaxed),
            bytes_per_second: self.speed.bytes_per_second(),
        }
    }

    fn emit(&self, event: TransferEvent) {
        // Nobody listening, or a slow listener: drop the event.
        let _ = self.events_tx.try_send(event);
    }
}
