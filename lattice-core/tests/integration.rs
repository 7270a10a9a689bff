//! End-to-end tests exercising signals, memos, effects, owners, batching,
//! and actions together.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lattice_core::reactive::{
    batch, Action, ActionOptions, ActionPhase, ConcurrencyPolicy, Effect, Memo, Owner, Signal,
};
use lattice_core::session::SessionHost;
use tokio_util::sync::CancellationToken;

struct InlineHost;
impl SessionHost for InlineHost {
    fn dispatch(&self, f: lattice_core::session::DispatchFn) {
        f();
    }
    fn std_context(&self) -> CancellationToken {
        CancellationToken::new()
    }
}

/// Counter reactivity: a memo recomputes once marked dirty after its
/// source signal changes.
#[test]
fn counter_reactivity() {
    let count = Signal::new(0);
    let c = count.clone();
    let doubled = Memo::new(move || c.get() * 2);

    assert_eq!(doubled.get(), 0);
    count.set(3);
    doubled.mark_dirty();
    assert_eq!(doubled.get(), 6);
}

/// Diamond dependency: an effect reading two memos that both derive from
/// the same signal still runs exactly once per round of writes.
#[test]
fn diamond_dependency_triggers_one_effect_run_per_change() {
    let owner = Owner::root();
    let a = Signal::new(1);

    let a1 = a.clone();
    let b = Memo::new(move || a1.get() * 2);
    let a2 = a.clone();
    let c = Memo::new(move || a2.get() * 3);

    let observed = Arc::new(AtomicI32::new(0));
    let run_count = Arc::new(AtomicUsize::new(0));
    let (obs, rc) = (observed.clone(), run_count.clone());
    let (b1, c1) = (b.clone(), c.clone());
    let _effect = Effect::new(&owner, move || {
        rc.fetch_add(1, Ordering::SeqCst);
        obs.store(b1.get() + c1.get(), Ordering::SeqCst);
        None
    });

    assert_eq!(observed.load(Ordering::SeqCst), 5);
    assert_eq!(run_count.load(Ordering::SeqCst), 1);

    a.set(2);
    owner.run_pending_effects(None);
    assert_eq!(observed.load(Ordering::SeqCst), 10);
    assert_eq!(run_count.load(Ordering::SeqCst), 2, "exactly one additional effect run");
}

/// Batched writes to three signals collapse into a single effect run.
#[test]
fn batch_collapses_three_writes_into_one_effect_run() {
    let owner = Owner::root();
    let (a, b, c) = (Signal::new(0), Signal::new(0), Signal::new(0));
    let run_count = Arc::new(AtomicUsize::new(0));
    let last_sum = Arc::new(AtomicI32::new(-1));

    let (a1, b1, c1) = (a.clone(), b.clone(), c.clone());
    let (rc, ls) = (run_count.clone(), last_sum.clone());
    let _effect = Effect::new(&owner, move || {
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
    owner.run_pending_effects(None);

    assert_eq!(run_count.load(Ordering::SeqCst), 2, "one run for the whole batch, not three");
    assert_eq!(last_sum.load(Ordering::SeqCst), 6);
}

/// Every descendant's disposal completes before its parent's `dispose()`
/// returns, exercised through effect cleanups registered at two tree
/// levels.
#[test]
fn owner_tree_disposes_children_before_parent() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let parent = Owner::root();
    let child = Owner::new(Some(&parent));

    let o1 = order.clone();
    Effect::new(&child, move || {
        let o1 = o1.clone();
        Some(Box::new(move || o1.lock().push("child")) as lattice_core::reactive::CleanupFn)
    });
    let o2 = order.clone();
    Effect::new(&parent, move || {
        let o2 = o2.clone();
        Some(Box::new(move || o2.lock().push("parent")) as lattice_core::reactive::CleanupFn)
    });

    parent.dispose();
    assert_eq!(*order.lock(), vec!["child", "parent"]);
}

/// CancelLatest ordering: the second call's result wins and the first
/// invocation's context is observably cancelled.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn action_cancel_latest_ordering() {
    let host: Arc<dyn SessionHost> = Arc::new(InlineHost);
    let first_cancelled = Arc::new(AtomicUsize::new(0));
    let fc = first_cancelled.clone();

    let action: Arc<Action<i32, i32>> = Action::new(
        host,
        move |ctx, arg| {
            let fc = fc.clone();
            async move {
                if arg == 1 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if ctx.is_cancelled() {
                        fc.fetch_add(1, Ordering::SeqCst);
                    }
                } else {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(arg)
            }
        },
        ConcurrencyPolicy::CancelLatest,
        ActionOptions::default(),
    );

    assert!(action.run(1));
    assert!(action.run(2));
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(action.phase(), ActionPhase::Success);
    assert_eq!(action.last_result(), Some(2));
    assert_eq!(first_cancelled.load(Ordering::SeqCst), 1, "the superseded run observed cancellation");
}

/// Queue(1) rejects a third call while one is running and one is
/// queued, then drains in order.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn action_queue_drains_in_order_after_rejecting_overflow() {
    let host: Arc<dyn SessionHost> = Arc::new(InlineHost);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = seen.clone();

    let action: Arc<Action<i32, i32>> = Action::new(
        host,
        move |_ctx, arg| {
            let s = s.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                s.lock().push(arg);
                Ok(arg)
            }
        },
        ConcurrencyPolicy::Queue(1),
        ActionOptions::default(),
    );

    assert!(action.run(1));
    assert!(action.run(2));
    assert!(!action.run(3));
    assert_eq!(action.phase(), ActionPhase::Error);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(*seen.lock(), vec![1, 2]);
    assert_eq!(action.phase(), ActionPhase::Success);
    assert_eq!(action.last_result(), Some(2));
}

/// Strict effect write detection.
#[test]
fn strict_effect_write_panics_without_allow_writes_and_succeeds_with_it() {
    use lattice_core::config::{configure, configure_with, EffectStrictMode, RuntimeConfig};
    use lattice_core::reactive::EffectOptions;
    use std::panic;

    static LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
    let _guard = LOCK.lock();
    configure(RuntimeConfig::default());
    configure_with(|c| c.effect_strict_mode = EffectStrictMode::Panic);

    let signal = Signal::new(0);
    let sig = signal.clone();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        Effect::new_standalone(move || {
            sig.set(1);
            None
        });
    }));
    assert!(result.is_err());
    assert_eq!(signal.peek(), 0, "the rejected write under Panic mode never landed");

    let owner = Owner::root();
    let sig2 = signal.clone();
    Effect::with_options(
        &owner,
        move || {
            sig2.set(1);
            None
        },
        EffectOptions {
            allow_writes: true,
            tx_name: None,
        },
    );
    assert_eq!(signal.peek(), 1);

    configure(RuntimeConfig::default());
}

/// Memos chained through memos still only recompute along the dirtied path.
#[test]
fn memo_depends_on_memo() {
    let base_signal = Signal::new(5);

    let signal_clone = base_signal.clone();
    let doubled = Memo::new(move || signal_clone.get() * 2);

    let doubled_clone = doubled.clone();
    let plus_ten = Memo::new(move || doubled_clone.get() + 10);

    assert_eq!(doubled.get(), 10);
    assert_eq!(plus_ten.get(), 20);

    base_signal.set(10);
    doubled.mark_dirty();
    plus_ten.mark_dirty();

    assert_eq!(doubled.get(), 20);
    assert_eq!(plus_ten.get(), 30);
}

/// A disposed effect never runs again, even if something still tries to
/// mark it dirty.
#[test]
fn disposed_effect_does_not_run() {
    let owner = Owner::root();
    let run_count = Arc::new(AtomicI32::new(0));
    let rc = run_count.clone();

    let effect = Effect::new(&owner, move || {
        rc.fetch_add(1, Ordering::SeqCst);
        None
    });
    assert_eq!(run_count.load(Ordering::SeqCst), 1);

    effect.dispose();
    effect.mark_dirty();
    effect.run();

    assert_eq!(run_count.load(Ordering::SeqCst), 1);
}

/// Hook-slot stability across two simulated renders of the same owner.
#[test]
fn hook_slot_is_stable_across_renders() {
    let owner = Owner::root();

    owner.start_render();
    let signal_render_0: Signal<i32> = owner.hook_slot(|| Signal::new(0));
    owner.end_render();

    owner.start_render();
    let signal_render_1: Signal<i32> = owner.hook_slot(|| Signal::new(999));
    owner.end_render();

    signal_render_0.set(7);
    assert_eq!(signal_render_1.peek(), 7);
}
