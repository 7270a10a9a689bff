//! Effect — a dependency-tracked side effect with a scoped cleanup.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::context;
use super::owner::Owner;
use super::subscriber::{Listener, Source};
use crate::ids::{next_listener_id, ListenerId};

/// The cleanup an effect body may return; run before the next invocation
/// and on disposal.
pub type CleanupFn = Box<dyn FnOnce() + Send>;
type EffectBody = Box<dyn FnMut() -> Option<CleanupFn> + Send>;

/// Options controlling how an effect is created: whether its body may
/// write signals without triggering the effect-time write check, and an
/// optional name for the transaction wrapping each run.
#[derive(Default)]
pub struct EffectOptions {
    pub allow_writes: bool,
    pub tx_name: Option<String>,
}

pub struct Effect {
    id: ListenerId,
    self_ref: Weak<Effect>,
    owner: Weak<Owner>,
    body: Mutex<EffectBody>,
    last_cleanup: Mutex<Option<CleanupFn>>,
    sources: RwLock<Vec<Weak<dyn Source>>>,
    pending: AtomicBool,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    call_site_state: Mutex<HashMap<usize, Arc<dyn Any + Send + Sync>>>,
    allow_writes: bool,
    tx_name: Option<String>,
}

impl Effect {
    fn new_raw(
        owner: Weak<Owner>,
        body: impl FnMut() -> Option<CleanupFn> + Send + 'static,
        opts: EffectOptions,
    ) -> Arc<Effect> {
        Arc::new_cyclic(|self_ref| Effect {
            id: next_listener_id(),
            self_ref: self_ref.clone(),
            owner,
            body: Mutex::new(Box::new(body)),
            last_cleanup: Mutex::new(None),
            sources: RwLock::new(Vec::new()),
            pending: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            call_site_state: Mutex::new(HashMap::new()),
            allow_writes: opts.allow_writes,
            tx_name: opts.tx_name,
        })
    }

    /// Create and register an effect on `owner`. Runs
    /// synchronously unless the owner is mid-render, in which case it is
    /// enqueued as a pending effect and runs after `EndRender`.
    pub fn new(owner: &Arc<Owner>, body: impl FnMut() -> Option<CleanupFn> + Send + 'static) -> Arc<Effect> {
        Self::with_options(owner, body, EffectOptions::default())
    }

    pub fn with_options(
        owner: &Arc<Owner>,
        body: impl FnMut() -> Option<CleanupFn> + Send + 'static,
        opts: EffectOptions,
    ) -> Arc<Effect> {
        let effect = Self::new_raw(Arc::downgrade(owner), body, opts);
        owner.register_effect(effect.clone());
        if owner.in_render() {
            effect.pending.store(true, Ordering::SeqCst);
            owner.push_pending_effect(effect.clone());
        } else {
            effect.run();
        }
        effect
    }

    /// An effect with no owning scope, used by tests and by call sites
    /// that manage their own lifetime. Runs immediately.
    pub fn new_standalone(body: impl FnMut() -> Option<CleanupFn> + Send + 'static) -> Arc<Effect> {
        let effect = Self::new_raw(Weak::new(), body, EffectOptions::default());
        effect.run();
        effect
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    fn as_arc(&self) -> Option<Arc<Effect>> {
        self.self_ref.upgrade()
    }

    fn clear_sources(&self) {
        let sources = std::mem::take(&mut *self.sources.write());
        for source in sources {
            if let Some(source) = source.upgrade() {
                source.unsubscribe(self.id);
            }
        }
    }

    /// Run the effect's last cleanup, clear stale dependencies, then
    /// execute the body with itself installed as the current listener
    /// and current effect.
    pub fn run(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.pending.store(false, Ordering::SeqCst);

        if let Some(cleanup) = self.last_cleanup.lock().take() {
            cleanup();
        }
        self.clear_sources();

        let owner = self.owner.upgrade();
        let listener: Arc<dyn Listener> = self.clone();
        let tx_name = self.tx_name.clone();
        let allow_writes = self.allow_writes;
        let body = &self.body;

        let run_body = move || {
            context::with_effect_body(self.clone(), allow_writes, || {
                let mut guard = body.lock();
                (*guard)()
            })
        };

        let new_cleanup = context::with_owner(owner, || {
            context::with_listener(Some(listener), || {
                if let Some(name) = &tx_name {
                    super::batch::tx_named(name, run_body)
                } else {
                    run_body()
                }
            })
        });

        *self.last_cleanup.lock() = new_cleanup;
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Disposal: runs the last cleanup, then unsubscribes from every
    /// recorded source.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cleanup) = self.last_cleanup.lock().take() {
            cleanup();
        }
        self.clear_sources();
    }

    /// Per-call-site state used by effect helpers (`Interval`, `Subscribe`,
    /// `Timeout`, `GoLatest`) to persist state across reruns at a stable
    /// call-site index.
    pub fn call_site_state<T, F>(&self, idx: usize, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut map = self.call_site_state.lock();
        if let Some(existing) = map.get(&idx) {
            if let Ok(v) = existing.clone().downcast::<T>() {
                return v;
            }
        }
        let v: Arc<T> = Arc::new(init());
        map.insert(idx, v.clone());
        v
    }
}

impl Listener for Effect {
    fn id(&self) -> ListenerId {
        self.id
    }

    /// Idempotent while pending: CAS false→true, then schedule with the
    /// owner on success only. Marking an already-pending effect dirty
    /// again is observationally a no-op.
    fn mark_dirty(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let (Some(owner), Some(me)) = (self.owner.upgrade(), self.as_arc()) {
                owner.push_pending_effect(me);
            }
        }
    }

    fn add_source(&self, source: Weak<dyn Source>) {
        self.sources.write().push(source);
    }
}

/// `OnMount(fn)`: sugar for an effect whose body runs once and returns no
/// cleanup.
pub fn on_mount(owner: &Arc<Owner>, f: impl FnOnce() + Send + 'static) -> Arc<Effect> {
    let mut f = Some(f);
    Effect::new(owner, move || {
        if let Some(f) = f.take() {
            f();
        }
        None
    })
}

/// `OnUnmount(fn)`: registers a plain cleanup on the owner.
pub fn on_unmount(owner: &Arc<Owner>, f: impl FnOnce() + Send + 'static) {
    owner.register_cleanup(f);
}

/// `OnUpdate(deps, cb)`: establishes dependencies via `deps` on every run
/// and skips `cb` on the first run only.
pub fn on_update<D>(
    owner: &Arc<Owner>,
    deps: impl Fn() -> D + Send + 'static,
    cb: impl Fn(D) + Send + 'static,
) -> Arc<Effect>
where
    D: Send + 'static,
{
    let first = AtomicBool::new(true);
    Effect::new(owner, move || {
        let value = deps();
        if !first.swap(false, Ordering::SeqCst) {
            cb(value);
        }
        None
    })
}
