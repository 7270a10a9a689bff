//! Effect helpers — `Interval`, `Subscribe`, `Timeout`, `GoLatest`.
//!
//! Every helper here is called from inside an effect body and returns a
//! [`CleanupFn`] the caller must hand back to the effect so it runs
//! before the next invocation or on disposal. All four honor prefetch
//! mode by short-circuiting to a no-op cleanup, and all dispatch their
//! observable work back onto the session loop rather than running it
//! inline on whatever thread produced it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::batch;
use super::context;
use super::effect::CleanupFn;
use crate::error::ReactiveError;
use crate::session::{MessageStream, SessionHost};

fn noop_cleanup() -> CleanupFn {
    Box::new(|| {})
}

fn require_ctx(on_missing: ReactiveError) -> CancellationToken {
    match context::current_ctx() {
        Some(ctx) => ctx,
        None => panic!("{}", on_missing),
    }
}

#[derive(Default)]
pub struct IntervalOptions {
    pub immediate: bool,
    pub name: Option<String>,
}

/// A periodic scheduler whose ticks are dispatched onto the session loop
/// wrapped in
/// `TxNamed("Interval[:name]")`.
pub fn interval(
    session: Arc<dyn SessionHost>,
    period: Duration,
    f: impl FnMut() + Send + 'static,
    opts: IntervalOptions,
) -> CleanupFn {
    if context::is_prefetching() {
        return noop_cleanup();
    }
    let root = require_ctx(ReactiveError::EffectContext);
    let cancel = root.child_token();
    let tx_name = match opts.name {
        Some(name) => format!("Interval[:{name}]"),
        None => "Interval".to_string(),
    };
    let body = Arc::new(Mutex::new(f));
    let ticker_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        if !opts.immediate {
            ticker.tick().await;
        }
        loop {
            tokio::select! {
                _ = ticker_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let body = body.clone();
                    let name = tx_name.clone();
                    session.dispatch(Box::new(move || {
                        batch::tx_named(&name, || {
                            (body.lock())();
                        });
                    }));
                }
            }
        }
    });

    Box::new(move || cancel.cancel())
}

#[derive(Default)]
pub struct SubscribeOptions {
    pub name: Option<String>,
}

/// Registers `f` with `stream`, wrapping each delivered message in a
/// session dispatch.
/// Cleanup invokes the unsubscribe handle the stream returned.
pub fn subscribe<T>(
    session: Arc<dyn SessionHost>,
    stream: Arc<dyn MessageStream<T>>,
    f: impl Fn(T) + Send + Sync + 'static,
    opts: SubscribeOptions,
) -> CleanupFn
where
    T: Send + 'static,
{
    if context::is_prefetching() {
        return noop_cleanup();
    }
    let _ctx = require_ctx(ReactiveError::EffectContext);
    let tx_name = opts.name.map(|name| format!("Subscribe[:{name}]"));
    let f = Arc::new(f);

    let unsubscribe = stream.subscribe(Box::new(move |msg: T| {
        let f = f.clone();
        let name = tx_name.clone();
        session.dispatch(Box::new(move || match &name {
            Some(name) => batch::tx_named(name, || f(msg)),
            None => f(msg),
        }));
    }));

    Box::new(unsubscribe)
}

#[derive(Default)]
pub struct TimeoutOptions {
    pub name: Option<String>,
}

/// One-shot deferred execution. An atomic fire-once bit is shared
/// between the timer task and the cleanup
/// so a cleanup racing the timer always wins.
pub fn timeout(
    session: Arc<dyn SessionHost>,
    delay: Duration,
    f: impl FnOnce() + Send + 'static,
    opts: TimeoutOptions,
) -> CleanupFn {
    if context::is_prefetching() {
        return noop_cleanup();
    }
    let root = require_ctx(ReactiveError::EffectContext);
    let cancel = root.child_token();
    let fired = Arc::new(AtomicBool::new(false));
    let tx_name = opts.name.map(|name| format!("Timeout[:{name}]"));

    let timer_cancel = cancel.clone();
    let timer_fired = fired.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer_cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let fired = timer_fired.clone();
                session.dispatch(Box::new(move || {
                    if fired
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        match &tx_name {
                            Some(name) => batch::tx_named(name, f),
                            None => f(),
                        }
                    }
                }));
            }
        }
    });

    Box::new(move || {
        fired.store(true, Ordering::SeqCst);
        cancel.cancel();
    })
}

struct GoLatestState<K> {
    prev_key: Mutex<Option<K>>,
    sequence: AtomicU64,
    cancel: Mutex<Option<CancellationToken>>,
    last_budget_refusal: Mutex<Option<Instant>>,
}

#[derive(Default)]
pub struct GoLatestOptions {
    pub force_restart: bool,
}

/// Keyed latest-wins async integration. Per-call-site state (previous key,
/// sequence number, in-flight cancellation) is allocated once on the
/// owning effect and preserved across reruns.
pub fn go_latest<K, R, Fut>(
    session: Arc<dyn SessionHost>,
    key: K,
    work: impl FnOnce(CancellationToken) -> Fut + Send + 'static,
    apply: impl FnOnce(Option<R>, Option<ReactiveError>) + Send + 'static,
    opts: GoLatestOptions,
) -> CleanupFn
where
    K: Clone + PartialEq + Send + Sync + 'static,
    R: Send + 'static,
    Fut: Future<Output = Result<R, ReactiveError>> + Send + 'static,
{
    if context::is_prefetching() {
        return noop_cleanup();
    }
    let effect = context::current_effect().unwrap_or_else(|| panic!("{}", ReactiveError::GoLatestContext));
    let idx = context::next_effect_call_site_idx();
    let state: Arc<GoLatestState<K>> = effect.call_site_state(idx, || GoLatestState {
        prev_key: Mutex::new(None),
        sequence: AtomicU64::new(0),
        cancel: Mutex::new(None),
        last_budget_refusal: Mutex::new(None),
    });

    let cleanup_state = state.clone();
    let cancel_on_unmount = move || {
        if let Some(token) = cleanup_state.cancel.lock().take() {
            token.cancel();
        }
    };

    let same_key = state
        .prev_key
        .lock()
        .as_ref()
        .map_or(false, |prev| *prev == key);
    if same_key && !opts.force_restart {
        return Box::new(cancel_on_unmount);
    }

    if let Some(token) = state.cancel.lock().take() {
        token.cancel();
    }
    *state.prev_key.lock() = Some(key);
    let seq = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;

    if let Some(budget) = session.storm_budget() {
        if !budget.check_go_latest() {
            let mut last = state.last_budget_refusal.lock();
            let now = Instant::now();
            let should_log = last.map_or(true, |t| now.duration_since(t) >= Duration::from_secs(1));
            if should_log {
                *last = Some(now);
                apply(None, Some(ReactiveError::BudgetExceeded("go_latest")));
            }
            return Box::new(cancel_on_unmount);
        }
    }

    let root = require_ctx(ReactiveError::GoLatestContext);
    let cancel = root.child_token();
    *state.cancel.lock() = Some(cancel.clone());

    let state2 = state.clone();
    let work_cancel = cancel.clone();
    tokio::spawn(async move {
        let result = work(work_cancel.clone()).await;
        if work_cancel.is_cancelled() {
            return;
        }
        if seq != state2.sequence.load(Ordering::SeqCst) {
            return;
        }
        session.dispatch(Box::new(move || match result {
            Ok(value) => apply(Some(value), None),
            Err(err) => apply(None, Some(err)),
        }));
    });

    Box::new(cancel_on_unmount)
}
