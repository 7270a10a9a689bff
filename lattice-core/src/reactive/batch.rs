//! Batching and transactions.
//!
//! `Batch`, `Tx`, and `TxNamed` share identical semantics: increment the
//! per-task batch depth, run the closure, decrement; when depth returns
//! to zero, drain the pending-updates queue accumulated in
//! [`super::context`] and `mark_dirty` each distinct listener exactly
//! once. The decrement and drain happen via scoped finalization, so a
//! panicking closure still drains before the panic propagates.

use std::sync::Arc;

use super::context;
use super::subscriber::Listener;
use tracing::trace;

struct ExitGuard;

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(drained) = context::exit_batch() {
            notify_drained(drained);
        }
    }
}

fn notify_drained(listeners: Vec<Arc<dyn Listener>>) {
    trace!(count = listeners.len(), "draining batched listener updates");
    for listener in listeners {
        listener.mark_dirty();
    }
}

/// Run `f` with the batch depth incremented by one. Writes inside `f`
/// are accumulated and each distinct listener is notified once when the
/// outermost batch closes.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    context::enter_batch();
    let _guard = ExitGuard;
    f()
}

/// Alias for `batch` — `Batch` and `Tx` are treated as identical.
pub fn tx<R>(f: impl FnOnce() -> R) -> R {
    batch(f)
}

/// Same semantics as `batch`, tagged with a name for diagnostics (used
/// by effect helpers like `Interval` to label their dispatched writes:
/// `TxNamed("Interval[:name]")`).
pub fn tx_named<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let _span = tracing::trace_span!("tx", name).entered();
    batch(f)
}

/// Clear the current listener for the duration of `fn` so reads inside
/// don't subscribe anything.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    context::untracked(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::Effect;
    use crate::reactive::signal::Signal;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn batch_dedups_multiple_writes_to_one_notification() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let c = Signal::new(0);
        let run_count = Arc::new(AtomicI32::new(0));
        let last_sum = Arc::new(AtomicI32::new(-1));

        let (a1, b1, c1) = (a.clone(), b.clone(), c.clone());
        let rc = run_count.clone();
        let ls = last_sum.clone();
        let effect = Effect::new_standalone(move || {
            rc.fetch_add(1, Ordering::SeqCst);
            ls.store(a1.get() + b1.get() + c1.get(), Ordering::SeqCst);
            None
        });
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        batch(|| {
            a.set(1);
            b.set(2);
            c.set(3);
        });
        effect.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert_eq!(last_sum.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn empty_batch_notifies_nothing() {
        let signal = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));
        let sig = signal.clone();
        let r = runs.clone();
        let _effect = Effect::new_standalone(move || {
            sig.get();
            r.fetch_add(1, Ordering::SeqCst);
            None
        });
        batch(|| {});
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_batches_only_drain_at_outermost_exit() {
        let signal = Signal::new(0);
        let notify_count = Arc::new(AtomicI32::new(0));
        let sig = signal.clone();
        let nc = notify_count.clone();
        let effect = Effect::new_standalone(move || {
            sig.get();
            nc.fetch_add(1, Ordering::SeqCst);
            None
        });
        assert_eq!(notify_count.load(Ordering::SeqCst), 1);

        batch(|| {
            signal.set(1);
            batch(|| {
                signal.set(2);
            });
            assert_eq!(
                notify_count.load(Ordering::SeqCst),
                1,
                "inner batch exit must not drain while the outer batch is still open"
            );
        });
        effect.run();
        assert_eq!(notify_count.load(Ordering::SeqCst), 2);
    }
}
