use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{error, info};

use super::queue::{CallbackQueue, CallbackToken};

/// Opaque unit of work fired once enough new objects have been ingested.
pub trait SyncCallback: Send + Sync {
    fn run(&self) -> BoxFuture<'static, anyhow::Result<()>>;
}

struct FnCallback<F>(F);

impl<F, Fut> SyncCallback for FnCallback<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.0)().boxed()
    }
}

/// Wraps an async closure as a [`SyncCallback`].
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn SyncCallback>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnCallback(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Armed,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Succeeded,
    Failed(String),
    Panicked,
}

#[derive(Debug, Default)]
struct SchedulerState {
    ingested: u64,
    next_seq: u64,
    pending: CallbackQueue,
    running: Option<u64>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    // Current FIFO head, republished under the state lock on every change.
    head: watch::Sender<Option<u64>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, seq: u64) {
        let mut state = self.lock();
        state.pending.remove(seq);
        if state.running == Some(seq) {
            state.running = None;
        }
        self.head.send_replace(state.pending.head());
    }
}

/// Counts ingested objects, arms callbacks at the threshold and runs armed
/// callbacks one at a time in arming order.
pub struct CallbackScheduler {
    shared: Arc<Shared>,
    callback: Option<Arc<dyn SyncCallback>>,
    threshold: Option<u64>,
}

impl CallbackScheduler {
    pub fn new(callback: Option<Arc<dyn SyncCallback>>, threshold: Option<u64>) -> Self {
        let (head, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                head,
            }),
            callback,
            threshold,
        }
    }

    /// Records `count` new objects and arms a callback when the running total
    /// reaches the threshold. Suppressed batches are not counted.
    pub fn on_batch_ingested(&self, count: usize, suppress_count: bool) -> Option<CallbackTicket> {
        let mut state = self.shared.lock();
        if !suppress_count {
            state.ingested = state.ingested.saturating_add(count as u64);
        }
        let (Some(callback), Some(threshold)) = (&self.callback, self.threshold) else {
            return None;
        };
        if state.ingested < threshold {
            return None;
        }

        state.ingested = 0;
        state.next_seq += 1;
        let token = CallbackToken {
            seq: state.next_seq,
            armed_at: OffsetDateTime::now_utc(),
        };
        state.pending.enqueue(token.clone());
        self.shared.head.send_replace(state.pending.head());
        info!(token = %token, pending = state.pending.len(), "callback armed");

        Some(CallbackTicket {
            token,
            shared: Arc::clone(&self.shared),
            callback: Arc::clone(callback),
        })
    }

    pub fn ingested(&self) -> u64 {
        self.shared.lock().ingested
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn phase(&self) -> SchedulerPhase {
        let state = self.shared.lock();
        if state.running.is_some() {
            SchedulerPhase::Running
        } else if state.pending.is_empty() {
            SchedulerPhase::Idle
        } else {
            SchedulerPhase::Armed
        }
    }
}

/// Right to run the callback once, after every earlier-armed ticket.
///
/// Dropping a ticket, whether it ran or not, removes its token from the
/// queue so later tickets are never blocked by an abandoned one.
pub struct CallbackTicket {
    token: CallbackToken,
    shared: Arc<Shared>,
    callback: Arc<dyn SyncCallback>,
}

impl CallbackTicket {
    pub fn token(&self) -> &CallbackToken {
        &self.token
    }

    /// Waits until this token heads the queue, then runs the callback.
    /// Errors and panics inside the callback are logged, not propagated.
    pub async fn run_when_ready(self) -> CallbackOutcome {
        let seq = self.token.seq;
        let mut head = self.shared.head.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        let _ = head.wait_for(|current| *current == Some(seq)).await;
        self.shared.lock().running = Some(seq);

        info!(token = %self.token, "running callback");
        let outcome = match AssertUnwindSafe(self.callback.run()).catch_unwind().await {
            Ok(Ok(())) => CallbackOutcome::Succeeded,
            Ok(Err(err)) => {
                error!(token = %self.token, error = %format!("{err:#}"), "callback failed");
                CallbackOutcome::Failed(format!("{err:#}"))
            }
            Err(_) => {
                error!(token = %self.token, "callback panicked");
                CallbackOutcome::Panicked
            }
        };
        info!(token = %self.token, ?outcome, "callback finished");
        outcome
    }
}

impl Drop for CallbackTicket {
    fn drop(&mut self) {
        self.shared.release(self.token.seq);
    }
}
