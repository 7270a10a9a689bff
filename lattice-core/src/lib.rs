//! Lattice Core
//!
//! The core of a fine-grained reactive runtime for a server-driven UI
//! framework: signals, memos, dependency-tracked effects and their owning
//! scope tree, batching/transactions, a per-task tracking context, async
//! actions with an explicit concurrency policy, the effect helpers built
//! on top of them (`Interval`, `Subscribe`, `Timeout`, `GoLatest`), storm
//! budgets, and the shared/global signal and memo variants that let
//! package-level reactive definitions stay session-scoped.
//!
//! This crate does not render, diff, or speak a wire protocol — it
//! consumes two capabilities from an embedding session (a `Dispatch(fn)`
//! that schedules work on the session's single event loop, and a
//! cancellable root context for outbound work; see [`session`]) and
//! offers four back (`start_render`/`end_render`, `run_pending_effects`,
//! `dispose`, all on [`reactive::Owner`]).
//!
//! # Example
//!
//! ```rust
//! use lattice_core::reactive::{Effect, Memo, Owner, Signal};
//!
//! let owner = Owner::root();
//! let count = Signal::new(0);
//!
//! let c = count.clone();
//! let doubled = Memo::new(move || c.get() * 2);
//!
//! let d = doubled.clone();
//! let _effect = Effect::new(&owner, move || {
//!     println!("doubled = {}", d.get());
//!     None
//! });
//!
//! count.set(5);
//! owner.run_pending_effects(None);
//! assert_eq!(doubled.peek(), 10);
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod reactive;
pub mod session;

pub use error::{ReactiveError, Result};
