//! Owner — a scope node in the render tree.
//!
//! Owners cascade disposal to children, effects, and cleanups; host the
//! per-component hook-slot array; and carry a context-value map threaded
//! down the tree. The core never mutates an owner from more than one
//! task concurrently.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::effect::Effect;
use super::storm::StormBudget;
use crate::config;
use crate::error::ReactiveError;
use crate::ids::{next_owner_id, OwnerId};

type Cleanup = Box<dyn FnOnce() + Send>;

struct HookSlot {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

pub struct Owner {
    id: OwnerId,
    parent: Option<Weak<Owner>>,
    children: RwLock<Vec<Arc<Owner>>>,
    effects: RwLock<Vec<Arc<Effect>>>,
    cleanups: RwLock<Vec<Cleanup>>,
    pending_effects: RwLock<VecDeque<Arc<Effect>>>,
    context_values: RwLock<IndexMap<TypeId, Box<dyn Any + Send + Sync>>>,
    hook_slots: RwLock<Vec<HookSlot>>,
    hook_cursor: AtomicUsize,
    first_render_done: AtomicBool,
    in_render: AtomicBool,
    disposed: AtomicBool,
}

impl Owner {
    pub fn root() -> Arc<Owner> {
        Self::new(None)
    }

    pub fn new(parent: Option<&Arc<Owner>>) -> Arc<Owner> {
        let owner = Arc::new(Owner {
            id: next_owner_id(),
            parent: parent.map(Arc::downgrade),
            children: RwLock::new(Vec::new()),
            effects: RwLock::new(Vec::new()),
            cleanups: RwLock::new(Vec::new()),
            pending_effects: RwLock::new(VecDeque::new()),
            context_values: RwLock::new(IndexMap::new()),
            hook_slots: RwLock::new(Vec::new()),
            hook_cursor: AtomicUsize::new(0),
            first_render_done: AtomicBool::new(false),
            in_render: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });
        if let Some(parent) = parent {
            parent.children.write().push(owner.clone());
        }
        owner
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn in_render(&self) -> bool {
        self.in_render.load(Ordering::SeqCst)
    }

    pub fn parent(&self) -> Option<Arc<Owner>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    // --- render phase / hook slots --------------------------------------

    /// Bracket the start of a render: reset the hook-slot cursor.
    pub fn start_render(&self) {
        self.hook_cursor.store(0, Ordering::SeqCst);
        self.in_render.store(true, Ordering::SeqCst);
    }

    /// Bracket the end of a render. In debug mode, validates that every
    /// hook slot allocated on the first render was visited again this
    /// render.
    pub fn end_render(&self) {
        self.in_render.store(false, Ordering::SeqCst);
        let cursor = self.hook_cursor.load(Ordering::SeqCst);
        let slot_count = self.hook_slots.read().len();
        if self.first_render_done.swap(true, Ordering::SeqCst) && config::debug_mode() {
            if cursor != slot_count {
                panic!(
                    "{}",
                    ReactiveError::HookOrderChanged(format!(
                        "owner {}: expected {slot_count} hook calls, got {cursor}",
                        self.id
                    ))
                );
            }
        }
    }

    /// Hook-constructor storage: on the first render for this call-site
    /// index, runs `make` and stores the result; on later renders,
    /// returns a clone of the stored instance.
    pub fn hook_slot<T, F>(&self, make: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let idx = self.hook_cursor.fetch_add(1, Ordering::SeqCst);
        let mut slots = self.hook_slots.write();
        if let Some(slot) = slots.get(idx) {
            if config::debug_mode() && slot.type_id != TypeId::of::<T>() {
                panic!(
                    "{}",
                    ReactiveError::HookOrderChanged(format!(
                        "owner {}: slot {idx} expected {}, got {}",
                        self.id,
                        slot.type_name,
                        std::any::type_name::<T>(),
                    ))
                );
            }
            return slot
                .value
                .downcast_ref::<T>()
                .expect("hook slot type mismatch despite matching TypeId")
                .clone();
        }
        let value = make();
        slots.push(HookSlot {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value.clone()),
        });
        value
    }

    // --- context values ----------------------------------------------------

    /// Install a context value visible to this owner and its descendants.
    pub fn provide_context<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.context_values
            .write()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Read a context value, walking up through ancestors if not found
    /// locally.
    pub fn use_context<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        if let Some(value) = self.context_values.read().get(&TypeId::of::<T>()) {
            return value.downcast_ref::<T>().cloned();
        }
        self.parent().and_then(|p| p.use_context::<T>())
    }

    // --- effects -------------------------------------------------------

    /// Register `effect` on this owner. A no-op on a disposed owner.
    pub fn register_effect(&self, effect: Arc<Effect>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.effects.write().push(effect);
    }

    pub fn push_pending_effect(&self, effect: Arc<Effect>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.pending_effects.write().push_back(effect);
    }

    pub fn has_pending_effects(&self) -> bool {
        if !self.pending_effects.read().is_empty() {
            return true;
        }
        self.children.read().iter().any(|c| c.has_pending_effects())
    }

    /// Drain queued effects subtree-first, consulting the storm budget's
    /// per-tick cap before each run.
    pub fn run_pending_effects(self: &Arc<Self>, budget: Option<&StormBudget>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let queued: Vec<Arc<Effect>> = {
            let mut q = self.pending_effects.write();
            q.drain(..).collect()
        };
        for effect in queued {
            if !effect.is_pending() {
                continue;
            }
            if let Some(budget) = budget {
                if !budget.try_start_effect_run() {
                    self.pending_effects.write().push_back(effect);
                    continue;
                }
            }
            effect.run();
        }
        let children: Vec<Arc<Owner>> = self.children.read().clone();
        for child in children {
            child.run_pending_effects(budget);
        }
    }

    // --- cleanups --------------------------------------------------------

    /// Register a cleanup to run on disposal, in reverse registration
    /// order. If the owner is already disposed, runs `f` immediately.
    pub fn register_cleanup(&self, f: impl FnOnce() + Send + 'static) {
        if self.disposed.load(Ordering::SeqCst) {
            f();
            return;
        }
        self.cleanups.write().push(Box::new(f));
    }

    // --- disposal --------------------------------------------------------

    /// Cascade teardown: remove from parent, dispose
    /// children in reverse creation order, dispose effects, run cleanups
    /// in reverse order, clear the pending-effects queue. A second call
    /// is a no-op.
    pub fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.children.write().retain(|c| c.id != self.id);
        }
        let children: Vec<Arc<Owner>> = {
            let mut c = self.children.write();
            std::mem::take(&mut *c)
        };
        for child in children.into_iter().rev() {
            child.dispose();
        }
        let effects: Vec<Arc<Effect>> = {
            let mut e = self.effects.write();
            std::mem::take(&mut *e)
        };
        for effect in effects.into_iter().rev() {
            effect.dispose();
        }
        let cleanups: Vec<Cleanup> = {
            let mut c = self.cleanups.write();
            std::mem::take(&mut *c)
        };
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        self.pending_effects.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn hook_slot_returns_stable_identity_across_renders() {
        let owner = Owner::root();
        owner.start_render();
        let s1: Signal<i32> = owner.hook_slot(|| Signal::new(0));
        owner.end_render();

        owner.start_render();
        let s2: Signal<i32> = owner.hook_slot(|| Signal::new(999));
        owner.end_render();

        s1.set(42);
        assert_eq!(s2.get(), 42, "hook slot should return the same signal, not a fresh one");
    }

    #[test]
    fn children_dispose_before_parent_in_reverse_order() {
        let order = Arc::new(RwLock::new(Vec::new()));
        let parent = Owner::root();
        let child_a = Owner::new(Some(&parent));
        let child_b = Owner::new(Some(&parent));

        let o1 = order.clone();
        child_a.register_cleanup(move || o1.write().push("a"));
        let o2 = order.clone();
        child_b.register_cleanup(move || o2.write().push("b"));
        let o3 = order.clone();
        parent.register_cleanup(move || o3.write().push("parent"));

        parent.dispose();
        assert_eq!(*order.read(), vec!["b", "a", "parent"]);
    }

    #[test]
    fn double_dispose_runs_cleanups_once() {
        let count = Arc::new(AtomicI32::new(0));
        let owner = Owner::root();
        let c = count.clone();
        owner.register_cleanup(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        owner.dispose();
        owner.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_registered_after_dispose_runs_immediately() {
        let ran = Arc::new(AtomicI32::new(0));
        let owner = Owner::root();
        owner.dispose();
        let r = ran.clone();
        owner.register_cleanup(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn context_value_visible_to_descendant() {
        let parent = Owner::root();
        parent.provide_context(42i32);
        let child = Owner::new(Some(&parent));
        assert_eq!(child.use_context::<i32>(), Some(42));
    }
}
