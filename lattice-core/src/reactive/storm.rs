//! Storm budgets — sliding-window and per-tick rate limiters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config;

/// What happens when a budget refuses a start. `TripBreaker`'s
/// higher-level pause policy is explicitly out of scope for the core —
/// it only exposes the flag so an embedder can react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExceeded {
    #[default]
    Throttle,
    TripBreaker,
}

struct SlidingWindow {
    window: Duration,
    cap: usize,
    starts: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    fn new(cap: usize, window: Duration) -> Self {
        Self {
            window,
            cap,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Evict entries older than `window`, then admit a new start if the
    /// remaining count would not exceed `cap`.
    fn try_add(&self, now: Instant) -> bool {
        let mut starts = self.starts.lock();
        while let Some(&front) = starts.front() {
            if now.duration_since(front) > self.window {
                starts.pop_front();
            } else {
                break;
            }
        }
        if starts.len() >= self.cap {
            false
        } else {
            starts.push_back(now);
            true
        }
    }
}

/// Rate limiter consulted by action starts, `GoLatest` starts, and
/// effect-run draining.
pub struct StormBudget {
    resource_starts: SlidingWindow,
    action_starts: SlidingWindow,
    go_latest_starts: SlidingWindow,
    effect_runs_per_tick: usize,
    effect_runs_this_tick: Mutex<usize>,
    on_exceeded: OnExceeded,
    tripped: AtomicBool,
}

/// Builder-style configuration for a budget's rate-limit tunables.
pub struct StormBudgetConfig {
    pub window: Duration,
    pub resource_starts_cap: usize,
    pub action_starts_cap: usize,
    pub go_latest_starts_cap: usize,
    pub effect_runs_per_tick: usize,
    pub on_exceeded: OnExceeded,
}

impl Default for StormBudgetConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            resource_starts_cap: 32,
            action_starts_cap: 16,
            go_latest_starts_cap: 16,
            effect_runs_per_tick: 256,
            on_exceeded: OnExceeded::default(),
        }
    }
}

impl StormBudget {
    pub fn new(cfg: StormBudgetConfig) -> Self {
        Self {
            resource_starts: SlidingWindow::new(cfg.resource_starts_cap, cfg.window),
            action_starts: SlidingWindow::new(cfg.action_starts_cap, cfg.window),
            go_latest_starts: SlidingWindow::new(cfg.go_latest_starts_cap, cfg.window),
            effect_runs_per_tick: cfg.effect_runs_per_tick,
            effect_runs_this_tick: Mutex::new(0),
            on_exceeded: cfg.on_exceeded,
            tripped: AtomicBool::new(false),
        }
    }

    pub fn on_exceeded(&self) -> OnExceeded {
        self.on_exceeded
    }

    /// Whether a refusal has occurred under `OnExceeded::TripBreaker`
    /// since the last [`StormBudget::reset_breaker`]. The core does not
    /// implement breaker-pause behavior itself, only exposes this flag
    /// for an embedder to act on.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Clear the tripped flag, e.g. once an embedder's breaker-pause
    /// window has elapsed.
    pub fn reset_breaker(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }

    fn log_refusal(&self, what: &str) {
        if self.on_exceeded == OnExceeded::TripBreaker {
            self.tripped.store(true, Ordering::SeqCst);
        }
        if config::config().debug.storm_budget_logging {
            debug!(what, policy = ?self.on_exceeded, "storm budget refused a start");
        }
    }

    /// Consulted before an action starts its work function.
    pub fn check_action(&self) -> bool {
        let ok = self.action_starts.try_add(Instant::now());
        if !ok {
            self.log_refusal("action_start");
        }
        ok
    }

    /// Consulted before a `GoLatest` call site starts its work future.
    pub fn check_go_latest(&self) -> bool {
        let ok = self.go_latest_starts.try_add(Instant::now());
        if !ok {
            self.log_refusal("go_latest_start");
        }
        ok
    }

    /// Consulted by resource-fetch style integrations sharing the same
    /// budget.
    pub fn check_resource(&self) -> bool {
        let ok = self.resource_starts.try_add(Instant::now());
        if !ok {
            self.log_refusal("resource_start");
        }
        ok
    }

    /// Reset the per-tick effect-run counter.
    pub fn reset_tick(&self) {
        *self.effect_runs_this_tick.lock() = 0;
    }

    /// Consulted by `RunPendingEffects` before each effect fires.
    pub fn try_start_effect_run(&self) -> bool {
        let mut count = self.effect_runs_this_tick.lock();
        if *count >= self.effect_runs_per_tick {
            self.log_refusal("effect_run");
            false
        } else {
            *count += 1;
            true
        }
    }
}
