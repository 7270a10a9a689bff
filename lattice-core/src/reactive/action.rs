//! Action — an async command with explicit concurrency policy.
//!
//! Work always runs off the session loop (`tokio::spawn`); every observed
//! state transition is applied back on the loop via
//! [`crate::session::SessionHost::dispatch`] so a session never sees a
//! torn read of an action's state.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::batch;
use crate::error::ReactiveError;
use crate::session::SessionHost;

type Result<T> = std::result::Result<T, ReactiveError>;
type WorkFuture<R> = Pin<Box<dyn Future<Output = Result<R>> + Send>>;
type WorkFn<A, R> = Arc<dyn Fn(CancellationToken, A) -> WorkFuture<R> + Send + Sync>;

/// How a second call is handled while an action is already running.
/// `CancelLatest` is the default: the common case for a search box or a
/// save button that should reflect only the newest input.
#[derive(Clone, Default)]
pub enum ConcurrencyPolicy {
    #[default]
    CancelLatest,
    DropWhileRunning,
    Queue(usize),
}

/// The four states an action's lifecycle visits. Distinct from
/// `last_result`/`last_error`, which persist across a `Reset` back to
/// `Idle` so a caller can still read "what did the last run produce"
/// after resetting the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Running,
    Success,
    Error,
}

/// Lifecycle hooks and diagnostics for an action.
pub struct ActionOptions<R> {
    pub on_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(&R) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&ReactiveError) + Send + Sync>>,
    /// Wraps the observable state transition (and callback) in a named
    /// transaction, same as `EffectOptions::tx_name`.
    pub tx_name: Option<String>,
}

impl<R> Default for ActionOptions<R> {
    fn default() -> Self {
        Self {
            on_start: None,
            on_success: None,
            on_error: None,
            tx_name: None,
        }
    }
}

/// An async command with cancellation and an explicit concurrency
/// policy. Cheaply `Clone`: clones share the same underlying state.
pub struct Action<A, R>
where
    A: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    session: Arc<dyn SessionHost>,
    work: WorkFn<A, R>,
    policy: ConcurrencyPolicy,
    phase: RwLock<ActionPhase>,
    last_result: RwLock<Option<R>>,
    last_error: RwLock<Option<ReactiveError>>,
    current_cancel: Mutex<Option<CancellationToken>>,
    sequence: AtomicU64,
    queued: Mutex<std::collections::VecDeque<A>>,
    opts: ActionOptions<R>,
}

impl<A, R> Action<A, R>
where
    A: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(
        session: Arc<dyn SessionHost>,
        work: F,
        policy: ConcurrencyPolicy,
        opts: ActionOptions<R>,
    ) -> Arc<Self>
    where
        F: Fn(CancellationToken, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let work: WorkFn<A, R> = Arc::new(move |ctx, arg| Box::pin(work(ctx, arg)));
        Arc::new(Self {
            session,
            work,
            policy,
            phase: RwLock::new(ActionPhase::Idle),
            last_result: RwLock::new(None),
            last_error: RwLock::new(None),
            current_cancel: Mutex::new(None),
            sequence: AtomicU64::new(0),
            queued: Mutex::new(std::collections::VecDeque::new()),
            opts,
        })
    }

    pub fn phase(&self) -> ActionPhase {
        *self.phase.read()
    }

    pub fn last_result(&self) -> Option<R> {
        self.last_result.read().clone()
    }

    pub fn last_error(&self) -> Option<ReactiveError> {
        self.last_error.read().clone()
    }

    /// Apply the concurrency policy and, if admitted, spawn the work
    /// function off the session loop. Returns whether the call was
    /// admitted (started or queued) rather than refused outright.
    pub fn run(self: &Arc<Self>, arg: A) -> bool {
        if let Some(budget) = self.session.storm_budget() {
            if !budget.check_action() {
                self.apply_rejection(ReactiveError::BudgetExceeded("action"));
                return false;
            }
        }

        match &self.policy {
            ConcurrencyPolicy::CancelLatest => {
                self.cancel_current();
                self.start(arg);
                true
            }
            ConcurrencyPolicy::DropWhileRunning => {
                if self.phase() == ActionPhase::Running {
                    self.apply_rejection(ReactiveError::ActionRunning);
                    false
                } else {
                    self.start(arg);
                    true
                }
            }
            ConcurrencyPolicy::Queue(max) => {
                if self.phase() == ActionPhase::Running {
                    let mut queued = self.queued.lock();
                    if queued.len() < *max {
                        queued.push_back(arg);
                        true
                    } else {
                        drop(queued);
                        self.apply_rejection(ReactiveError::QueueFull(*max));
                        false
                    }
                } else {
                    self.start(arg);
                    true
                }
            }
        }
    }

    /// Return to `Idle` from any phase. If work is in flight, cancel it
    /// and bump the sequence number so its
    /// eventual completion is treated as stale and discarded — a reset
    /// action never has a late completion resurrect it out of `Idle`.
    pub fn reset(&self) {
        self.cancel_current();
        self.sequence.fetch_add(1, Ordering::SeqCst);
        self.queued.lock().clear();
        *self.phase.write() = ActionPhase::Idle;
    }

    fn cancel_current(&self) {
        if let Some(token) = self.current_cancel.lock().take() {
            token.cancel();
        }
    }

    fn apply_rejection(&self, err: ReactiveError) {
        *self.last_error.write() = Some(err.clone());
        *self.phase.write() = ActionPhase::Error;
        if let Some(cb) = &self.opts.on_error {
            cb(&err);
        }
    }

    fn start(self: &Arc<Self>, arg: A) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        *self.phase.write() = ActionPhase::Running;
        if let Some(on_start) = &self.opts.on_start {
            on_start();
        }

        let cancel = self.session.std_context().child_token();
        *self.current_cancel.lock() = Some(cancel.clone());

        let work = self.work.clone();
        let this = self.clone();
        let session = self.session.clone();
        tokio::spawn(async move {
            let outcome = (work)(cancel.clone(), arg).await;
            if cancel.is_cancelled() {
                return;
            }
            session.dispatch(Box::new(move || {
                this.apply_outcome(seq, outcome);
            }));
        });
    }

    /// Applies a completed work function's result on the session loop. A
    /// stale sequence number (superseded by a later `Run`/`Reset`) is
    /// discarded silently — superseded runs never observe their result.
    fn apply_outcome(self: &Arc<Self>, seq: u64, outcome: Result<R>) {
        if seq != self.sequence.load(Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let apply = move || match outcome {
            Ok(value) => {
                *this.last_result.write() = Some(value.clone());
                *this.phase.write() = ActionPhase::Success;
                if let Some(cb) = &this.opts.on_success {
                    cb(&value);
                }
            }
            Err(err) => {
                *this.last_error.write() = Some(err.clone());
                *this.phase.write() = ActionPhase::Error;
                if let Some(cb) = &this.opts.on_error {
                    cb(&err);
                }
            }
        };
        match &self.opts.tx_name {
            Some(name) => batch::tx_named(name, apply),
            None => apply(),
        }
        self.drain_queue();
    }

    fn drain_queue(self: &Arc<Self>) {
        if matches!(&self.policy, ConcurrencyPolicy::Queue(_)) {
            let next = self.queued.lock().pop_front();
            if let Some(arg) = next {
                self.start(arg);
            }
        }
    }
}
