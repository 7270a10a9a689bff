//! Memo — a lazy, cached derivation that is itself a producer.
//!
//! A memo is both a listener (so it can be invalidated by its sources)
//! and a producer (so its own subscribers can track it) — `Inner<T>`
//! implements both `Listener` and `Source` so the same allocation serves
//! both roles.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use super::context;
use super::signal::SubscriptionBase;
use super::subscriber::{Listener, Source};
use crate::ids::{next_listener_id, ListenerId};

type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct Inner<T> {
    id: ListenerId,
    producer: Mutex<Box<dyn FnMut() -> T + Send>>,
    cached: RwLock<Option<T>>,
    valid: AtomicBool,
    computing_thread: Mutex<Option<ThreadId>>,
    equal: EqFn<T>,
    base: SubscriptionBase,
    sources: RwLock<Vec<Weak<dyn Source>>>,
}

impl<T: Send + Sync + 'static> Source for Inner<T> {
    fn unsubscribe(&self, listener: ListenerId) {
        self.base.unsubscribe(listener);
    }
}

impl<T: Send + Sync + 'static> Listener for Inner<T> {
    fn id(&self) -> ListenerId {
        self.id
    }

    /// CAS `valid` true→false; propagate to subscribers only on that
    /// exact transition. A recompute that later produces a changed value
    /// never notifies from here — invalidation is the only thing a
    /// memo's subscribers ever see.
    fn mark_dirty(&self) {
        if self
            .valid
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.base.notify();
        }
    }

    fn add_source(&self, source: Weak<dyn Source>) {
        self.sources.write().push(source);
    }
}

/// A lazy cached computation. Cheaply `Clone`: clones share the same
/// underlying cell.
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Default + 'static,
{
    pub fn new(producer: impl FnMut() -> T + Send + 'static) -> Self {
        Self::with_eq(producer, Arc::new(|a: &T, b: &T| a == b))
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + Default + 'static,
{
    pub fn with_eq(producer: impl FnMut() -> T + Send + 'static, equal: EqFn<T>) -> Self {
        Memo {
            inner: Arc::new(Inner {
                id: next_listener_id(),
                producer: Mutex::new(Box::new(producer)),
                cached: RwLock::new(None),
                valid: AtomicBool::new(false),
                computing_thread: Mutex::new(None),
                equal,
                base: SubscriptionBase::new(),
                sources: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.inner.id
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.base.subscriber_count()
    }

    fn subscribe_current_listener(&self) {
        if let Some(listener) = context::current_listener() {
            let source: Arc<dyn Source> = self.inner.clone();
            self.inner.base.subscribe(&listener, Arc::downgrade(&source));
        }
    }

    /// Subscribe the current listener, then recompute if invalid.
    pub fn get(&self) -> T {
        self.subscribe_current_listener();
        self.resolve()
    }

    /// Behaves like `get` without subscribing.
    pub fn peek(&self) -> T {
        self.resolve()
    }

    fn resolve(&self) -> T {
        if !self.inner.valid.load(Ordering::SeqCst) {
            self.recompute();
        }
        if let Some(value) = self.inner.cached.read().clone() {
            return value;
        }
        // A same-thread reentrant read broke the cycle below before this
        // memo ever produced a value, so there's nothing cached to hand
        // back. Returning the default is the only panic-free option.
        T::default()
    }

    fn clear_sources(&self) {
        let sources = std::mem::take(&mut *self.inner.sources.write());
        for source in sources {
            if let Some(source) = source.upgrade() {
                source.unsubscribe(self.inner.id);
            }
        }
    }

    /// Recompute the cached value if it's still invalid.
    ///
    /// Same-thread reentrancy (the producer reading its own memo before
    /// it has produced anything) bails out immediately rather than
    /// recursing into the `producer` lock it already holds. A different
    /// thread racing to compute the same invalid memo instead blocks on
    /// that lock and, once it acquires it, re-checks `valid` — the
    /// thread that got there first already did the work.
    fn recompute(&self) {
        if self.inner.valid.load(Ordering::SeqCst) {
            return;
        }

        let this_thread = std::thread::current().id();
        if *self.inner.computing_thread.lock() == Some(this_thread) {
            return;
        }

        let mut producer = self.inner.producer.lock();
        if self.inner.valid.load(Ordering::SeqCst) {
            return;
        }

        *self.inner.computing_thread.lock() = Some(this_thread);
        self.clear_sources();
        let self_listener: Arc<dyn Listener> = self.inner.clone();
        let new_value = context::with_listener(Some(self_listener), || (*producer)());
        *self.inner.computing_thread.lock() = None;

        {
            let mut cached = self.inner.cached.write();
            match cached.as_ref() {
                Some(old) if (self.inner.equal)(old, &new_value) => {}
                _ => *cached = Some(new_value),
            }
        }
        self.inner.valid.store(true, Ordering::SeqCst);
    }

    /// Exposed so callers (owners, tests, the runtime) can invalidate a
    /// memo without going through its sources.
    pub fn mark_dirty(&self) {
        Listener::mark_dirty(&*self.inner);
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("valid", &self.is_valid())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::Effect;
    use crate::reactive::signal::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn memo_caches_until_dependency_changes() {
        let compute_count = Arc::new(AtomicI32::new(0));
        let signal = Signal::new(10);
        let sig = signal.clone();
        let cc = compute_count.clone();
        let memo = Memo::new(move || {
            cc.fetch_add(1, Ordering::SeqCst);
            sig.get() * 2
        });

        assert_eq!(memo.get(), 20);
        assert_eq!(memo.get(), 20);
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        signal.set(3);
        memo.mark_dirty();
        assert_eq!(memo.get(), 6);
        assert_eq!(compute_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn counter_reactivity_scenario() {
        let count = Signal::new(0);
        let c = count.clone();
        let doubled = Memo::new(move || c.get() * 2);
        assert_eq!(doubled.get(), 0);
        count.set(3);
        doubled.mark_dirty();
        assert_eq!(doubled.get(), 6);
    }

    #[test]
    fn diamond_dependency_scenario() {
        let a = Signal::new(1);
        let a1 = a.clone();
        let b = Memo::new(move || a1.get() * 2);
        let a2 = a.clone();
        let c = Memo::new(move || a2.get() * 3);

        let observed = Arc::new(AtomicI32::new(0));
        let obs = observed.clone();
        let (b1, c1) = (b.clone(), c.clone());
        let effect = Effect::new_standalone(move || {
            obs.store(b1.get() + c1.get(), Ordering::SeqCst);
            None
        });
        assert_eq!(observed.load(Ordering::SeqCst), 5);

        a.set(2);
        b.mark_dirty();
        c.mark_dirty();
        effect.run();
        assert_eq!(observed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn peek_does_not_subscribe() {
        let signal = Signal::new(1);
        let sig = signal.clone();
        let memo = Memo::new(move || sig.get());
        let m = memo.clone();
        let _effect = Effect::new_standalone(move || {
            m.peek();
            None
        });
        assert_eq!(memo.subscriber_count(), 0);
    }

    #[test]
    fn mark_dirty_is_idempotent_while_already_invalid() {
        let memo: Memo<i32> = Memo::new(|| 1);
        memo.get();
        assert!(memo.is_valid());
        memo.mark_dirty();
        assert!(!memo.is_valid());
        // A second mark_dirty while already invalid must not re-notify
        // (no true->false transition to observe); just confirm it stays
        // invalid and doesn't panic.
        memo.mark_dirty();
        assert!(!memo.is_valid());
    }

    #[test]
    fn recompute_does_not_notify_subscribers_a_second_time() {
        let signal = Signal::new(1);
        let sig = signal.clone();
        let memo = Memo::new(move || sig.get());

        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let m = memo.clone();
        let _effect = Effect::new_standalone(move || {
            rc.fetch_add(1, Ordering::SeqCst);
            m.get();
            None
        });
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        // Invalidate and read through once. The recompute below changes
        // the cached value but must not trigger any further dirtying on
        // top of the single true->false transition `mark_dirty` already
        // produced.
        memo.mark_dirty();
        signal.set(2);
        assert_eq!(memo.get(), 2);
        assert_eq!(run_count.load(Ordering::SeqCst), 1, "recompute alone schedules nothing new");
    }

    #[test]
    fn reentrant_get_breaks_the_cycle_without_panicking() {
        use std::sync::OnceLock;

        // A producer that reads its own memo before it has ever produced
        // a value. `cell` lets the closure capture a handle to the memo
        // it belongs to without requiring it to exist yet.
        let cell: Arc<OnceLock<Memo<i32>>> = Arc::new(OnceLock::new());
        let cell_clone = cell.clone();
        let cyclic: Memo<i32> = Memo::new(move || {
            cell_clone.get().map(|m| m.peek()).unwrap_or(0) + 1
        });
        cell.set(cyclic.clone()).ok();

        // The reentrant inner `peek()` bails with no cached value and
        // falls back to `T::default()` (0) rather than panicking.
        assert_eq!(cyclic.get(), 1);
    }
}
