//! The erased interface producers hold to notify listeners.
//!
//! A producer (signal or memo) never needs to know the concrete type of
//! its subscribers — only that it can mark them dirty and recognize their
//! identity for dedup. Keeping this interface tiny means `Signal<T>` and
//! `Memo<T>` can be monomorphized per `T` while the subscription graph
//! itself stays type-erased.

use crate::ids::ListenerId;
use std::sync::{Arc, Weak};

/// The erased producer side: anything a listener can later unsubscribe
/// itself from.
pub trait Source: Send + Sync {
    fn unsubscribe(&self, listener: ListenerId);
}

/// Anything a producer can notify: a memo or an effect.
///
/// Implementors are held by producers as `Weak<dyn Listener>` — lifetime
/// is governed by the owner tree, never by the subscription list itself.
pub trait Listener: Send + Sync {
    /// Stable identity used for subscriber-set dedup.
    fn id(&self) -> ListenerId;

    /// Mark this listener dirty / pending. Must be idempotent: calling it
    /// twice while already dirty/pending has no additional effect.
    fn mark_dirty(&self);

    /// Record `source` as one of this listener's current producers, so a
    /// later recompute/rerun can unsubscribe from exactly the sources it
    /// actually read last time.
    fn add_source(&self, source: Weak<dyn Source>);
}

/// An ordered, id-deduplicated set of listener references.
///
/// Plain small-vec rather than a hash set: subscriber counts are small in
/// practice (a handful of effects/memos per signal) and stable
/// membership is all that's required, not any particular order, so a
/// linear scan for dedup is the simplest correct thing.
#[derive(Default)]
pub struct SubscriberSet {
    entries: smallvec::SmallVec<[Weak<dyn Listener>; 4]>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` if not already present (deduped by id). Stale
    /// (dropped) weak refs encountered during the scan are pruned.
    pub fn insert(&mut self, listener: &Arc<dyn Listener>) {
        let id = listener.id();
        let mut already_present = false;
        self.entries.retain(|weak| match weak.upgrade() {
            Some(existing) => {
                if existing.id() == id {
                    already_present = true;
                }
                true
            }
            None => false,
        });
        if !already_present {
            self.entries.push(Arc::downgrade(listener));
        }
    }

    pub fn remove(&mut self, id: ListenerId) {
        self.entries.retain(|weak| match weak.upgrade() {
            Some(existing) => existing.id() != id,
            None => false,
        });
    }

    /// Snapshot the live listeners under the caller's lock, for the
    /// copy-then-notify pattern. Dropped entries are pruned as a side
    /// effect.
    pub fn snapshot(&mut self) -> Vec<Arc<dyn Listener>> {
        let mut live = Vec::with_capacity(self.entries.len());
        self.entries.retain(|weak| match weak.upgrade() {
            Some(l) => {
                live.push(l);
                true
            }
            None => false,
        });
        live
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
