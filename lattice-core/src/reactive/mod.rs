//! Reactive primitives — the fine-grained reactive core.
//!
//! Dependency order, leaves first: ids → tracking context →
//! subscription base → signals → memos → owner → effects →
//! batch/transactions → context values / hook slots → refs → actions →
//! effect helpers → storm budgets → shared/global wrappers. Module layout
//! below follows that order.
//!
//! ## Signals
//!
//! A [`Signal`] is a reactive cell. Reading one while a listener (a memo
//! or an effect) is installed subscribes that listener; writing notifies
//! every current subscriber exactly once, immediately or — inside a
//! [`batch`] — once the outermost batch closes.
//!
//! ## Memos
//!
//! A [`Memo`] is a lazy, cached derivation. It is itself a producer — its
//! own subscribers track it the same way they'd track a signal — and a
//! listener of its own sources, so it gets invalidated and recomputes on
//! next access.
//!
//! ## Effects
//!
//! An [`Effect`] is a dependency-tracked side effect with a scoped
//! cleanup, owned by an [`Owner`] that cascades disposal down a scope
//! tree.

pub mod action;
pub mod batch;
pub mod context;
pub mod effect;
pub mod helpers;
pub mod memo;
pub mod owner;
pub mod refs;
pub mod shared;
pub mod signal;
pub mod storm;
pub mod subscriber;

pub use action::{Action, ActionOptions, ActionPhase, ConcurrencyPolicy};
pub use batch::{batch, tx, tx_named, untracked};
pub use context::{current_ctx, current_owner, with_ctx, with_owner};
pub use effect::{on_mount, on_unmount, on_update, CleanupFn, Effect, EffectOptions};
pub use helpers::{
    go_latest, interval, subscribe, timeout, GoLatestOptions, IntervalOptions, SubscribeOptions,
    TimeoutOptions,
};
pub use memo::Memo;
pub use owner::Owner;
pub use refs::Ref;
pub use shared::{GlobalMemo, GlobalSignal, SessionSignalStore, SharedMemoDef, SharedSignalDef};
pub use signal::{AnySignal, Persistable, Signal};
pub use storm::{OnExceeded, StormBudget, StormBudgetConfig};
pub use subscriber::{Listener, Source};

use crate::config::{self, EffectStrictMode};
use tracing::warn;

/// Effect-time write detection. Called by every signal
/// mutation before it takes effect. A write from inside a running effect
/// body that hasn't opted into `AllowWrites` is almost always a bug: it
/// either silently hides a missing dependency or re-enters the effect on
/// its own write.
pub(crate) fn effect_time_write_check(method: &'static str) {
    if !context::in_effect_body() || context::effect_allow_writes() {
        return;
    }
    match config::effect_strict_mode() {
        EffectStrictMode::Off => {}
        EffectStrictMode::Warn => {
            warn!(
                method,
                "Signal::{method} called from inside an effect body without AllowWrites(); \
                 consider Interval for periodic writes, Subscribe for stream writes, \
                 GoLatest for async writes, or the AllowWrites effect option"
            );
        }
        EffectStrictMode::Panic => {
            panic!(
                "Signal::{method} called from inside an effect body without AllowWrites() \
                 (EffectStrictMode::Panic)"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{configure, configure_with, EffectStrictMode as Mode, RuntimeConfig};
    use std::panic;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static CONFIG_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn panic_mode_rejects_write_in_effect_body_without_allow_writes() {
        let _guard = CONFIG_LOCK.lock();
        configure(RuntimeConfig::default());
        configure_with(|c| c.effect_strict_mode = Mode::Panic);

        let signal = Signal::new(0);
        let sig = signal.clone();
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            Effect::new_standalone(move || {
                sig.set(1);
                None
            });
        }));
        assert!(result.is_err(), "Set inside an effect body must panic under Panic mode");

        configure(RuntimeConfig::default());
    }

    #[test]
    fn allow_writes_permits_the_same_write() {
        let _guard = CONFIG_LOCK.lock();
        configure(RuntimeConfig::default());
        configure_with(|c| c.effect_strict_mode = Mode::Panic);

        let signal = Signal::new(0);
        let sig = signal.clone();
        let owner = Owner::root();
        let run_count = Arc::new(AtomicUsize::new(0));
        let rc = run_count.clone();
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            effect::Effect::with_options(
                &owner,
                move || {
                    sig.set(1);
                    rc.fetch_add(1, Ordering::SeqCst);
                    None
                },
                EffectOptions {
                    allow_writes: true,
                    tx_name: None,
                },
            );
        }));
        assert!(result.is_ok(), "AllowWrites() must let the write through even under Panic mode");
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.peek(), 1);

        configure(RuntimeConfig::default());
    }

    #[test]
    fn off_mode_is_silent() {
        let _guard = CONFIG_LOCK.lock();
        configure(RuntimeConfig::default());
        configure_with(|c| c.effect_strict_mode = Mode::Off);
        let signal = Signal::new(0);
        let sig = signal.clone();
        Effect::new_standalone(move || {
            sig.set(5);
            None
        });
        assert_eq!(signal.peek(), 5);
        configure(RuntimeConfig::default());
    }
}
