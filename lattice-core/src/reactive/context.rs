//! Per-task tracking context.
//!
//! Every executing task (in this crate: every OS thread, since the core
//! assumes a multi-threaded host) carries exactly one `TrackingContext`.
//! It is never shared across tasks; a task that spawns
//! work needing to create primitives for a parent owner must explicitly
//! thread owner + context across the boundary via `with_owner`/`with_ctx`.
//!
//! All setters return the previous value so callers can restore it
//! manually if they aren't using the scoped `with_*` helpers, which do so
//! automatically (even on panic, via `Drop`).

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use super::effect::Effect;
use super::owner::Owner;
use super::subscriber::Listener;
use crate::ids::ListenerId;

struct TrackingContext {
    current_owner: Option<Arc<Owner>>,
    current_listener: Option<Arc<dyn Listener>>,
    batch_depth: u32,
    /// Pending listener notifications accumulated while `batch_depth > 0`.
    /// `IndexMap` gives "first occurrence wins, in insertion order" dedup
    /// by listener id.
    pending_updates: IndexMap<ListenerId, Arc<dyn Listener>>,
    current_ctx: Option<CancellationToken>,
    current_effect: Option<Arc<Effect>>,
    effect_call_site_idx: usize,
    in_effect_body: bool,
    effect_allow_writes: bool,
    prefetching: bool,
}

impl TrackingContext {
    const fn new() -> Self {
        Self {
            current_owner: None,
            current_listener: None,
            batch_depth: 0,
            pending_updates: IndexMap::new(),
            current_ctx: None,
            current_effect: None,
            effect_call_site_idx: 0,
            in_effect_body: false,
            effect_allow_writes: false,
            prefetching: false,
        }
    }
}

thread_local! {
    static CTX: RefCell<TrackingContext> = RefCell::new(TrackingContext::new());
}

fn with<R>(f: impl FnOnce(&mut TrackingContext) -> R) -> R {
    CTX.with(|c| f(&mut c.borrow_mut()))
}

// --- current_owner ---------------------------------------------------

pub fn current_owner() -> Option<Arc<Owner>> {
    with(|c| c.current_owner.clone())
}

pub fn set_current_owner(owner: Option<Arc<Owner>>) -> Option<Arc<Owner>> {
    with(|c| std::mem::replace(&mut c.current_owner, owner))
}

/// Scoped set-run-restore for the current owner.
pub fn with_owner<R>(owner: Option<Arc<Owner>>, f: impl FnOnce() -> R) -> R {
    let previous = set_current_owner(owner);
    let _guard = RestoreOwner(Some(previous));
    f()
}

struct RestoreOwner(Option<Option<Arc<Owner>>>);
impl Drop for RestoreOwner {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            set_current_owner(previous);
        }
    }
}

// --- current_listener --------------------------------------------------

pub fn current_listener() -> Option<Arc<dyn Listener>> {
    with(|c| c.current_listener.clone())
}

pub fn set_current_listener(listener: Option<Arc<dyn Listener>>) -> Option<Arc<dyn Listener>> {
    with(|c| std::mem::replace(&mut c.current_listener, listener))
}

/// Scoped set-run-restore for the current listener. Used when
/// recomputing a memo or running an effect body.
pub fn with_listener<R>(listener: Option<Arc<dyn Listener>>, f: impl FnOnce() -> R) -> R {
    let previous = set_current_listener(listener);
    let _guard = RestoreListener(Some(previous));
    f()
}

struct RestoreListener(Option<Option<Arc<dyn Listener>>>);
impl Drop for RestoreListener {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            set_current_listener(previous);
        }
    }
}

/// Clear the current listener for the duration of `fn`. Reads inside
/// `fn` do not subscribe anything.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    with_listener(None, f)
}

// --- batching ------------------------------------------------------------

pub fn batch_depth() -> u32 {
    with(|c| c.batch_depth)
}

pub fn enter_batch() -> u32 {
    with(|c| {
        c.batch_depth += 1;
        c.batch_depth
    })
}

/// Decrement the depth and, if it has returned to zero, drain and return
/// the accumulated pending updates in first-seen order. Returns `None`
/// while still nested inside an outer batch.
pub fn exit_batch() -> Option<Vec<Arc<dyn Listener>>> {
    with(|c| {
        c.batch_depth = c.batch_depth.saturating_sub(1);
        if c.batch_depth == 0 {
            Some(c.pending_updates.drain(..).map(|(_, l)| l).collect())
        } else {
            None
        }
    })
}

/// Queue `listener` for a single deduplicated `mark_dirty` when the
/// outermost batch closes.
pub fn queue_pending_update(listener: Arc<dyn Listener>) {
    with(|c| {
        c.pending_updates.entry(listener.id()).or_insert(listener);
    });
}

pub fn is_batching() -> bool {
    batch_depth() > 0
}

// --- current_ctx ---------------------------------------------------------

pub fn current_ctx() -> Option<CancellationToken> {
    with(|c| c.current_ctx.clone())
}

pub fn set_current_ctx(ctx: Option<CancellationToken>) -> Option<CancellationToken> {
    with(|c| std::mem::replace(&mut c.current_ctx, ctx))
}

/// Install the session context for the task.
pub fn with_ctx<R>(ctx: CancellationToken, f: impl FnOnce() -> R) -> R {
    let previous = set_current_ctx(Some(ctx));
    let _guard = RestoreCtx(Some(previous));
    f()
}

struct RestoreCtx(Option<Option<CancellationToken>>);
impl Drop for RestoreCtx {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            set_current_ctx(previous);
        }
    }
}

// --- current_effect / effect-time-write detection -------------------------

pub fn current_effect() -> Option<Arc<Effect>> {
    with(|c| c.current_effect.clone())
}

pub fn effect_call_site_idx() -> usize {
    with(|c| c.effect_call_site_idx)
}

/// Allocate and return the next call-site index within the currently
/// running effect body (used by `GoLatest` and friends to find their
/// per-call-site state slot).
pub fn next_effect_call_site_idx() -> usize {
    with(|c| {
        let idx = c.effect_call_site_idx;
        c.effect_call_site_idx += 1;
        idx
    })
}

pub fn in_effect_body() -> bool {
    with(|c| c.in_effect_body)
}

pub fn effect_allow_writes() -> bool {
    with(|c| c.effect_allow_writes)
}

/// Install `effect` as current, reset the call-site cursor, mark
/// `in_effect_body`, and run `body`. Restores the previous state
/// (including on panic) so nested/adjacent effect runs never see stale
/// flags.
pub fn with_effect_body<R>(effect: Arc<Effect>, allow_writes: bool, body: impl FnOnce() -> R) -> R {
    let previous = with(|c| {
        let previous = (
            c.current_effect.take(),
            c.effect_call_site_idx,
            c.in_effect_body,
            c.effect_allow_writes,
        );
        c.current_effect = Some(effect);
        c.effect_call_site_idx = 0;
        c.in_effect_body = true;
        c.effect_allow_writes = allow_writes;
        previous
    });
    let _guard = RestoreEffect(Some(previous));
    body()
}

struct RestoreEffect(Option<(Option<Arc<Effect>>, usize, bool, bool)>);
impl Drop for RestoreEffect {
    fn drop(&mut self) {
        if let Some((effect, idx, in_body, allow_writes)) = self.0.take() {
            with(|c| {
                c.current_effect = effect;
                c.effect_call_site_idx = idx;
                c.in_effect_body = in_body;
                c.effect_allow_writes = allow_writes;
            });
        }
    }
}

// --- prefetch mode ---------------------------------------------------

/// A session mode in which mutating operations are suppressed (dropped
/// in production, panicked in dev mode). Per-task like the rest of the
/// tracking context: a server
/// handling a prefetch render for one session must not suppress writes
/// on another task handling a live render for a different session.
pub fn is_prefetching() -> bool {
    with(|c| c.prefetching)
}

pub fn set_prefetching(value: bool) -> bool {
    with(|c| std::mem::replace(&mut c.prefetching, value))
}

pub fn with_prefetching<R>(value: bool, f: impl FnOnce() -> R) -> R {
    let previous = set_prefetching(value);
    let _guard = RestorePrefetch(Some(previous));
    f()
}

struct RestorePrefetch(Option<bool>);
impl Drop for RestorePrefetch {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            set_prefetching(previous);
        }
    }
}
