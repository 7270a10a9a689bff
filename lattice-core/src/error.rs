//! Error kinds surfaced by the reactive core.
//!
//! Errors that indicate programmer misuse (hook order, missing tracking
//! context) fail fast — callers see a panic built from this enum's
//! `Display`. Errors that reflect environmental conditions (storm
//! budgets, full action queues) are returned as first-class values or
//! surfaced as primitive state, never panics.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReactiveError {
    /// A storm budget refused a start (action, `GoLatest`, or effect dispatch).
    #[error("storm budget exceeded for {0}")]
    BudgetExceeded(&'static str),

    /// An `Action` configured with `Queue(max)` was asked to enqueue beyond capacity.
    #[error("action queue is full (max {0})")]
    QueueFull(usize),

    /// Sentinel surfaced when a `DropWhileRunning` action rejects a call.
    #[error("action is already running")]
    ActionRunning,

    /// An effect helper (`Interval`, `Subscribe`, `Timeout`, `GoLatest`) was
    /// called outside of an effect body / without a tracking context.
    #[error("effect helper called outside of an effect body")]
    EffectContext,

    /// `GoLatest` was called outside of an effect.
    #[error("GoLatest called outside of an effect")]
    GoLatestContext,

    /// `Signal::set_any` (dynamic-type convenience setter) received a value
    /// of the wrong underlying type.
    #[error("type mismatch: signal holds a different concrete type")]
    TypeMismatch,

    /// Debug-mode only: a component's hook count or hook kind sequence
    /// diverged between renders of the same owner.
    #[error("hook order changed across renders: {0}")]
    HookOrderChanged(String),

    /// A persistence-hook (de)serialization round trip failed.
    #[error("persistence round-trip failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, ReactiveError>;
