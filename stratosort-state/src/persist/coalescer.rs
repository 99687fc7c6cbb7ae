use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{SaveFailure, SaveOutcome};

pub type SaveWaiter = oneshot::Sender<SaveOutcome>;

#[derive(Debug, Default)]
struct PendingSaves {
    waiters: Vec<SaveWaiter>,
    armed: bool,
    /// Bumped whenever the window is drained; a timer armed for an older
    /// generation fires as a no-op.
    generation: u64,
}

/// Collects save requests that arrive within one debounce window so they can
/// be answered by a single write.
///
/// The coalescer only does the bookkeeping. The owner arms a timer when
/// [`SaveCoalescer::register`] reports a new window, and resolves the drained
/// waiters once the write finishes.
#[derive(Debug)]
pub struct SaveCoalescer {
    window: Duration,
    pending: Mutex<PendingSaves>,
}

/// Receipt for a registered save request.
#[derive(Debug)]
pub struct SaveRequest {
    pub receiver: oneshot::Receiver<SaveOutcome>,
    /// Set when this request opened a new window; the caller must arm a timer
    /// that later calls [`SaveCoalescer::take_window`] with this generation.
    pub arm_generation: Option<u64>,
}

impl SaveCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(PendingSaves::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn register(&self) -> SaveRequest {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        pending.waiters.push(tx);

        let arm_generation = if pending.armed {
            None
        } else {
            pending.armed = true;
            Some(pending.generation)
        };

        SaveRequest {
            receiver: rx,
            arm_generation,
        }
    }

    /// Drain the window for a timer armed at `generation`. Returns `None`
    /// if the window was already drained by a flush.
    pub fn take_window(&self, generation: u64) -> Option<Vec<SaveWaiter>> {
        let mut pending = self.pending.lock();
        if !pending.armed || pending.generation != generation {
            return None;
        }
        Some(Self::drain(&mut pending))
    }

    /// Drain the window immediately, disarming any armed timer.
    pub fn take_all(&self) -> Vec<SaveWaiter> {
        let mut pending = self.pending.lock();
        Self::drain(&mut pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().waiters.len()
    }

    fn drain(pending: &mut PendingSaves) -> Vec<SaveWaiter> {
        pending.armed = false;
        pending.generation = pending.generation.wrapping_add(1);
        std::mem::take(&mut pending.waiters)
    }
}

/// Hand the same outcome to every coalesced caller. Callers that stopped
/// waiting are skipped.
pub fn resolve_all(waiters: Vec<SaveWaiter>, outcome: &SaveOutcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

/// Await a registered request. A dropped sender means the store went away
/// before the write ran.
pub async fn wait(receiver: oneshot::Receiver<SaveOutcome>) -> SaveOutcome {
    receiver.await.unwrap_or_else(|_| {
        Err(SaveFailure::new("state store dropped before saving", 0))
    })
}
