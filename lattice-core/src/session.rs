//! Collaborator traits consumed from the embedding session.
//!
//! The core is a library, not a host: it never starts its own event loop
//! or I/O reactor. Everything it needs from the outside world — a way to
//! schedule a closure back onto the session's single-threaded loop, and a
//! cancellable root context for outbound async work — is expressed as a
//! trait the session implements once.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::reactive::storm::StormBudget;

/// A closure the session loop will eventually run. Boxed so `Dispatch`
/// can be object-safe and stored in a trait object.
pub type DispatchFn = Box<dyn FnOnce() + Send + 'static>;

/// The single capability the core needs to make observable state changes:
/// a way to schedule `fn` onto the session's cooperative loop. Effect
/// bodies and all state mutations observable to a session run on that
/// single per-session cooperative loop.
pub trait SessionHost: Send + Sync + 'static {
    /// Schedule `f` to run on the session's single event loop.
    fn dispatch(&self, f: DispatchFn);

    /// A cancellable root context for outbound async work (actions,
    /// `GoLatest`). Cancelling the returned token is the sole mechanism
    /// for aborting in-flight work.
    fn std_context(&self) -> CancellationToken;

    /// The optional storm budget governing this session's rate limits.
    fn storm_budget(&self) -> Option<Arc<StormBudget>> {
        None
    }
}

/// Minimal stream abstraction consumed by the `Subscribe` effect helper.
/// Modeled on
/// `futures_util::Stream`'s subscribe-with-unsubscribe-handle shape used
/// elsewhere in the retrieval pack's websocket-adjacent crates, but kept
/// minimal: the core only needs push-based delivery plus a way to stop it.
pub trait MessageStream<T>: Send + Sync {
    /// Register `handler` to be invoked for every message. Returns an
    /// unsubscribe handle; dropping or calling it stops delivery.
    fn subscribe(&self, handler: Box<dyn Fn(T) + Send + Sync>) -> Box<dyn FnOnce() + Send>;
}

/// Adapts any `futures_util::Stream` (a broadcast channel wrapper, a
/// websocket frame stream, anything `tokio-stream`-shaped) into a
/// [`MessageStream`] by polling it to completion on a spawned task and
/// forwarding each item to `subscribe`'s handler. `new` takes a factory
/// rather than an already-constructed stream because the stream needs to
/// be (re)created fresh for every `subscribe` call — the same `Subscribe`
/// effect helper call site can run more than once across effect reruns.
pub struct FromStream<F> {
    make_stream: F,
}

impl<F, S, T> FromStream<F>
where
    F: Fn() -> S + Send + Sync + 'static,
    S: futures_util::Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    pub fn new(make_stream: F) -> Arc<Self> {
        Arc::new(Self { make_stream })
    }
}

impl<F, S, T> MessageStream<T> for FromStream<F>
where
    F: Fn() -> S + Send + Sync + 'static,
    S: futures_util::Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    fn subscribe(&self, handler: Box<dyn Fn(T) + Send + Sync>) -> Box<dyn FnOnce() + Send> {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let mut stream = Box::pin((self.make_stream)());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(item) => handler(item),
                        None => break,
                    },
                }
            }
        });
        Box::new(move || cancel.cancel())
    }
}
