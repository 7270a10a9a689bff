//! Signal — the reactive cell.
//!
//! A signal holds a value of type `T`, an equality predicate used to gate
//! notification, and two persistence flags consumed by an external
//! persistence layer. Reads under an installed listener subscribe that
//! listener; writes compare-then-notify, either immediately or via the
//! batch queue.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context;
use super::subscriber::{Listener, Source, SubscriberSet};
use crate::config;
use crate::error::{ReactiveError, Result};
use crate::ids::{next_signal_id, SignalId};

/// Equality gate used to decide whether a write actually mutates the
/// stored value and notifies subscribers. Defaults to `PartialEq` for
/// the common case; `Signal::with_eq` installs a custom predicate (e.g.
/// to treat NaN-bearing floats or large structures with a cheaper
/// comparison).
type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// The non-owning producer side shared by `Signal` and `Memo`.
pub(crate) struct SubscriptionBase {
    subscribers: RwLock<SubscriberSet>,
}

impl SubscriptionBase {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: RwLock::new(SubscriberSet::new()),
        }
    }

    /// Subscribe `listener`, deduped by id, and tell it about us as a
    /// source so it can unsubscribe later.
    pub(crate) fn subscribe(&self, listener: &Arc<dyn Listener>, source: std::sync::Weak<dyn Source>) {
        self.subscribers.write().insert(listener);
        listener.add_source(source);
    }

    pub(crate) fn unsubscribe(&self, id: crate::ids::ListenerId) {
        self.subscribers.write().remove(id);
    }

    /// Copy-then-notify: snapshot the subscriber list under the lock,
    /// release it, then either queue (batch mode) or `mark_dirty`
    /// immediately.
    pub(crate) fn notify(&self) {
        let snapshot = self.subscribers.write().snapshot();
        for listener in snapshot {
            if context::is_batching() {
                context::queue_pending_update(listener);
            } else {
                listener.mark_dirty();
            }
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.write().len()
    }
}

struct Inner<T> {
    value: RwLock<T>,
    base: SubscriptionBase,
    equal: EqFn<T>,
    transient: bool,
    persist_key: Option<String>,
}

/// A reactive cell holding a value of type `T`.
///
/// Cheaply `Clone`: clones share the same underlying cell (`Arc`).
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: SignalId,
    inner: Arc<Inner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a signal using `PartialEq` as the equality gate — the fast
    /// path for primitive/comparable types.
    pub fn new(value: T) -> Self {
        Self::with_eq(value, Arc::new(|a: &T, b: &T| a == b))
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal with a custom equality predicate.
    pub fn with_eq(value: T, equal: EqFn<T>) -> Self {
        Self {
            id: next_signal_id(),
            inner: Arc::new(Inner {
                value: RwLock::new(value),
                base: SubscriptionBase::new(),
                equal,
                transient: false,
                persist_key: None,
            }),
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Mark this signal as non-persisted.
    pub fn transient(mut self) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("transient() must be called before the signal is cloned/shared")
            .transient = true;
        self
    }

    /// Attach an explicit persistence key.
    pub fn with_persist_key(mut self, key: impl Into<String>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_persist_key() must be called before the signal is cloned/shared")
            .persist_key = Some(key.into());
        self
    }

    fn subscribe_current_listener(&self) {
        if let Some(listener) = context::current_listener() {
            let source: Arc<dyn Source> = self.inner.clone();
            self.inner.base.subscribe(&listener, Arc::downgrade(&source));
        }
    }

    /// Read under the value lock; subscribes the current listener if one
    /// is installed.
    pub fn get(&self) -> T {
        self.subscribe_current_listener();
        self.inner.value.read().clone()
    }

    /// Read without subscribing.
    pub fn peek(&self) -> T {
        self.inner.value.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.base.subscriber_count()
    }

    /// Fails silent in prefetch mode (drop in production, panic in dev
    /// mode); otherwise equality-gated compare-and-notify.
    pub fn set(&self, value: T) {
        self.set_named("Set", value);
    }

    /// Atomic read-modify-write through the same equality gate as `set`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.update_named("Update", f);
    }

    /// Write without notifying subscribers. Used only by context
    /// providers propagating new values during render — children read
    /// the new value on their own render.
    pub fn set_quietly(&self, value: T) {
        *self.inner.value.write() = value;
    }

    fn set_named(&self, method: &'static str, value: T) {
        if self.prefetch_blocked(method) {
            return;
        }
        self.raw_set(method, value);
    }

    fn update_named(&self, method: &'static str, f: impl FnOnce(&T) -> T) {
        if self.prefetch_blocked(method) {
            return;
        }
        let new_value = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.raw_set(method, new_value);
    }

    fn raw_set(&self, method: &'static str, value: T) {
        super::effect_time_write_check(method);
        let changed = {
            let mut guard = self.inner.value.write();
            if (self.inner.equal)(&guard, &value) {
                false
            } else {
                *guard = value;
                true
            }
        };
        if changed {
            self.inner.base.notify();
        }
    }

    /// Returns `true` (and drops the write) when prefetch mode should
    /// suppress this mutation. In dev mode this panics instead of
    /// silently dropping.
    fn prefetch_blocked(&self, method: &'static str) -> bool {
        if !context::is_prefetching() {
            return false;
        }
        if config::dev_mode() {
            panic!("Signal::{method} called during prefetch mode (dev_mode panics instead of dropping)");
        }
        true
    }
}

impl<T> Source for Inner<T>
where
    T: Send + Sync + 'static,
{
    fn unsubscribe(&self, listener: crate::ids::ListenerId) {
        self.base.unsubscribe(listener);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.peek())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Persistence capability. The core never calls these itself — they
/// exist so an external persistence layer can enumerate an owner's
/// signals and round-trip their values.
pub trait Persistable {
    fn persist_key(&self) -> Option<&str>;
    fn is_transient(&self) -> bool;
    fn serialize_value(&self) -> Result<Vec<u8>>;
    fn restore_value(&self, bytes: &[u8]) -> Result<()>;
}

impl<T> Persistable for Signal<T>
where
    T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    fn persist_key(&self) -> Option<&str> {
        self.inner.persist_key.as_deref()
    }

    fn is_transient(&self) -> bool {
        self.inner.transient
    }

    fn serialize_value(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(&*self.inner.value.read())
            .map_err(|e| ReactiveError::Persistence(e.to_string()))
    }

    fn restore_value(&self, bytes: &[u8]) -> Result<()> {
        let value: T =
            rmp_serde::from_slice(bytes).map_err(|e| ReactiveError::Persistence(e.to_string()))?;
        self.set_quietly(value);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Typed convenience methods
// ---------------------------------------------------------------------

macro_rules! impl_numeric_convenience {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Signal<$t> {
                pub fn inc(&self) {
                    self.update_named("Inc", |v| v + 1 as $t);
                }
                pub fn dec(&self) {
                    self.update_named("Dec", |v| v - 1 as $t);
                }
                pub fn add(&self, rhs: $t) {
                    self.update_named("Add", |v| v + rhs);
                }
                pub fn sub(&self, rhs: $t) {
                    self.update_named("Sub", |v| v - rhs);
                }
                pub fn mul(&self, rhs: $t) {
                    self.update_named("Mul", |v| v * rhs);
                }
                pub fn div(&self, rhs: $t) {
                    self.update_named("Div", |v| v / rhs);
                }
            }
        )+
    };
}

impl_numeric_convenience!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Signal<bool> {
    pub fn toggle(&self) {
        self.update_named("Toggle", |v| !v);
    }
    pub fn set_true(&self) {
        self.set_named("SetTrue", true);
    }
    pub fn set_false(&self) {
        self.set_named("SetFalse", false);
    }
}

impl Signal<String> {
    pub fn append(&self, suffix: &str) {
        self.update_named("Append", |v| {
            let mut s = v.clone();
            s.push_str(suffix);
            s
        });
    }
    pub fn prepend(&self, prefix: &str) {
        self.update_named("Prepend", |v| format!("{prefix}{v}"));
    }
    pub fn clear(&self) {
        self.set_named("Clear", String::new());
    }
    pub fn len(&self) -> usize {
        self.peek().len()
    }
}

impl<T> Signal<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn append_item(&self, item: T) {
        self.update_named("AppendItem", |v| {
            let mut v = v.clone();
            v.push(item);
            v
        });
    }

    pub fn prepend_item(&self, item: T) {
        self.update_named("PrependItem", |v| {
            let mut v = v.clone();
            v.insert(0, item);
            v
        });
    }

    pub fn insert_at(&self, index: usize, item: T) {
        self.update_named("InsertAt", |v| {
            let mut v = v.clone();
            let index = index.min(v.len());
            v.insert(index, item);
            v
        });
    }

    pub fn remove_at(&self, index: usize) {
        self.update_named("RemoveAt", |v| {
            let mut v = v.clone();
            if index < v.len() {
                v.remove(index);
            }
            v
        });
    }

    pub fn remove_first(&self) {
        self.remove_at(0);
    }

    pub fn remove_last(&self) {
        self.update_named("RemoveLast", |v| {
            let mut v = v.clone();
            v.pop();
            v
        });
    }

    pub fn remove_where(&self, pred: impl Fn(&T) -> bool) {
        self.update_named("RemoveWhere", |v| {
            v.iter().filter(|item| !pred(item)).cloned().collect()
        });
    }

    pub fn set_at(&self, index: usize, item: T) {
        self.update_named("SetAt", |v| {
            let mut v = v.clone();
            if let Some(slot) = v.get_mut(index) {
                *slot = item;
            }
            v
        });
    }

    pub fn update_at(&self, index: usize, f: impl FnOnce(&T) -> T) {
        self.update_named("UpdateAt", |v| {
            let mut v = v.clone();
            if let Some(slot) = v.get_mut(index) {
                *slot = f(slot);
            }
            v
        });
    }

    pub fn update_where(&self, pred: impl Fn(&T) -> bool, f: impl Fn(&T) -> T) {
        self.update_named("UpdateWhere", |v| {
            v.iter()
                .map(|item| if pred(item) { f(item) } else { item.clone() })
                .collect()
        });
    }

    pub fn filter(&self, pred: impl Fn(&T) -> bool) {
        self.update_named("Filter", |v| v.iter().filter(|item| pred(item)).cloned().collect());
    }

    pub fn clear(&self) {
        self.set_named("Clear", Vec::new());
    }

    pub fn len(&self) -> usize {
        self.peek().len()
    }
}

impl<K, V> Signal<HashMap<K, V>>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn set_key(&self, key: K, value: V) {
        self.update_named("SetKey", |v| {
            let mut v = v.clone();
            v.insert(key.clone(), value);
            v
        });
    }

    pub fn remove_key(&self, key: &K) {
        self.update_named("RemoveKey", |v| {
            let mut v = v.clone();
            v.remove(key);
            v
        });
    }

    pub fn update_key(&self, key: K, f: impl FnOnce(Option<&V>) -> V) {
        self.update_named("UpdateKey", |v| {
            let mut v = v.clone();
            let new_value = f(v.get(&key));
            v.insert(key.clone(), new_value);
            v
        });
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.get().contains_key(key)
    }

    pub fn clear(&self) {
        self.set_named("Clear", HashMap::new());
    }

    pub fn len(&self) -> usize {
        self.peek().len()
    }
}

/// Dynamic-type erased entry point. Used by the shared/global signal
/// store, which holds heterogeneous signals behind a type-erased handle
/// keyed only by id.
pub trait AnySignal: Send + Sync {
    fn set_any(&self, value: Box<dyn Any + Send>) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> AnySignal for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn set_any(&self, value: Box<dyn Any + Send>) -> Result<()> {
        match value.downcast::<T>() {
            Ok(v) => {
                self.set(*v);
                Ok(())
            }
            Err(_) => Err(ReactiveError::TypeMismatch),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
