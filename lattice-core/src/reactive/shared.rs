//! Shared and global signal/memo variants.
//!
//! A `SharedSignalDef`/`SharedMemoDef` is declared once, typically as a
//! module-level `static`, and reserves its store key lazily on first use
//! rather than at construction — `new` stays `const fn` so it can be
//! written as a plain module-level registry. Each session owns one
//! [`SessionSignalStore`]; a definition accessed through two different
//! stores yields two independent instances, so a package-level reactive
//! definition never leaks state across sessions. `GlobalSignal`/
//! `GlobalMemo` are the opposite: one instance, shared by every session.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use super::memo::Memo;
use super::signal::Signal;
use crate::ids::{next_shared_memo_key, next_shared_signal_key};

/// Per-session storage for lazily-constructed shared signals/memos.
/// Backed by `dashmap::DashMap` so `get_or_create` supports concurrent
/// callers racing on the same session.
#[derive(Default)]
pub struct SessionSignalStore {
    entries: DashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl SessionSignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent lazy allocation keyed by `id`. Concurrent callers racing
    /// on the same unpopulated `id` each run `factory`, but only one
    /// result is kept — `DashMap::entry` serializes on the shard lock, so
    /// the loser's freshly-built value is simply dropped.
    pub fn get_or_create<T>(&self, id: u64, factory: impl FnOnce() -> T) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let entry = self
            .entries
            .entry(id)
            .or_insert_with(|| Arc::new(factory()) as Arc<dyn Any + Send + Sync>);
        entry
            .clone()
            .downcast::<T>()
            .expect("SessionSignalStore: id reused with a different type")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A stable handle to a per-session signal, declared once at process
/// start. `new` is `const fn` so a definition can be written as a
/// module-level `static` the same way [`GlobalSignal`] is.
pub struct SharedSignalDef<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    key: OnceLock<u64>,
    initial: fn() -> T,
}

impl<T> SharedSignalDef<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub const fn new(initial: fn() -> T) -> Self {
        Self {
            key: OnceLock::new(),
            initial,
        }
    }

    fn key(&self) -> u64 {
        *self.key.get_or_init(next_shared_signal_key)
    }

    /// Lazily construct (or retrieve) this definition's signal inside
    /// `store`.
    pub fn signal(&self, store: &SessionSignalStore) -> Signal<T> {
        let key = self.key();
        let initial = self.initial;
        (*store.get_or_create(key, move || Signal::new(initial()))).clone()
    }

    /// Returns the initial value without registering anything in any
    /// store.
    pub fn get_without_session(&self) -> T {
        (self.initial)()
    }

    /// A no-op outside a session; provided so callers can write uniform
    /// code without branching on session presence themselves.
    pub fn set_without_session(&self, _value: T) {}
}

/// A stable handle to a per-session memo.
pub struct SharedMemoDef<T>
where
    T: Clone + Send + Sync + PartialEq + Default + 'static,
{
    key: OnceLock<u64>,
    producer: fn() -> T,
}

impl<T> SharedMemoDef<T>
where
    T: Clone + Send + Sync + PartialEq + Default + 'static,
{
    pub const fn new(producer: fn() -> T) -> Self {
        Self {
            key: OnceLock::new(),
            producer,
        }
    }

    fn key(&self) -> u64 {
        *self.key.get_or_init(next_shared_memo_key)
    }

    /// Lazily construct (or retrieve) this definition's memo inside
    /// `store`.
    pub fn memo(&self, store: &SessionSignalStore) -> Memo<T> {
        let key = self.key();
        let producer = self.producer;
        (*store.get_or_create(key, move || Memo::new(producer))).clone()
    }

    /// Outside a session, a shared memo computes inline rather than
    /// returning a stale value — there is no cache to serve from, so
    /// every call re-runs the producer.
    pub fn get_without_session(&self) -> T {
        (self.producer)()
    }
}

/// A single process-wide signal shared by every session. Declared as a
/// module-level `static`, backed by a `OnceLock`.
pub struct GlobalSignal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    cell: OnceLock<Signal<T>>,
    init: fn() -> T,
}

impl<T> GlobalSignal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            cell: OnceLock::new(),
            init,
        }
    }

    fn signal(&self) -> &Signal<T> {
        self.cell.get_or_init(|| Signal::new((self.init)()))
    }

    pub fn get(&self) -> T {
        self.signal().get()
    }

    pub fn peek(&self) -> T {
        self.signal().peek()
    }

    pub fn set(&self, value: T) {
        self.signal().set(value);
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.signal().update(f);
    }
}

/// A single process-wide memo shared by every session.
pub struct GlobalMemo<T>
where
    T: Clone + Send + Sync + PartialEq + Default + 'static,
{
    cell: OnceLock<Memo<T>>,
    producer: fn() -> T,
}

impl<T> GlobalMemo<T>
where
    T: Clone + Send + Sync + PartialEq + Default + 'static,
{
    pub const fn new(producer: fn() -> T) -> Self {
        Self {
            cell: OnceLock::new(),
            producer,
        }
    }

    fn memo(&self) -> &Memo<T> {
        self.cell.get_or_init(|| Memo::new(self.producer))
    }

    pub fn get(&self) -> T {
        self.memo().get()
    }

    pub fn peek(&self) -> T {
        self.memo().peek()
    }
}
