//! Process-wide identifier generation.
//!
//! Every reactive primitive (signal, memo, effect, owner) gets a unique,
//! never-reused id from a monotonically increasing counter. Ids are used
//! for subscriber deduplication, not for addressing: producers and
//! listeners always hold the actual `Weak`/`Arc` alongside the id.

use std::sync::atomic::{AtomicU64, Ordering};

/// A single monotonic counter. Each reactive kind (signal, memo, effect,
/// owner) owns its own `IdGen` instance so that ids never collide across
/// kinds, each following the same one-process-wide-counter shape.
pub(crate) struct IdGen(AtomicU64);

impl IdGen {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn raw(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

id_type!(SignalId, "Unique id of a signal (producer).");
id_type!(ListenerId, "Unique id of a memo or effect (listener).");
id_type!(OwnerId, "Unique id of an owner scope.");

static SIGNAL_IDS: IdGen = IdGen::new();
static LISTENER_IDS: IdGen = IdGen::new();
static OWNER_IDS: IdGen = IdGen::new();
static SHARED_SIGNAL_IDS: IdGen = IdGen::new();
static SHARED_MEMO_IDS: IdGen = IdGen::new();

/// High bit used to tag shared-memo store keys so they can never collide
/// with a shared-signal key in the same `SessionSignalStore`.
const SHARED_MEMO_TAG: u64 = 1 << 63;

pub(crate) fn next_signal_id() -> SignalId {
    SignalId(SIGNAL_IDS.next())
}

pub(crate) fn next_listener_id() -> ListenerId {
    ListenerId(LISTENER_IDS.next())
}

pub(crate) fn next_owner_id() -> OwnerId {
    OwnerId(OWNER_IDS.next())
}

/// Reserve a store key for a `SharedSignalDef`.
pub(crate) fn next_shared_signal_key() -> u64 {
    SHARED_SIGNAL_IDS.next()
}

/// Reserve a store key for a `SharedMemoDef`, tagged with the high bit.
pub(crate) fn next_shared_memo_key() -> u64 {
    SHARED_MEMO_TAG | SHARED_MEMO_IDS.next()
}
