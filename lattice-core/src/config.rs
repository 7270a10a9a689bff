//! Process-global configuration.
//!
//! Kept deliberately minimal: the id counters, `DebugMode`, `DevMode`,
//! `EffectStrictMode`, and the `Debug` flag bundle are the only
//! process-wide mutable state the core admits. Everything else is
//! per-owner or per-task.

use parking_lot::RwLock;
use std::sync::OnceLock;

/// How an effect body's attempt to write a signal is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectStrictMode {
    /// No action taken.
    Off,
    /// Emit a `tracing::warn!` identifying the method and a suggested helper.
    #[default]
    Warn,
    /// Fail fast with a descriptive error.
    Panic,
}

/// Fine-grained debug logging toggles.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugFlags {
    pub source_locations: bool,
    pub raw_keys: bool,
    pub effect_run_logging: bool,
    pub storm_budget_logging: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub debug_mode: bool,
    pub dev_mode: bool,
    pub effect_strict_mode: EffectStrictMode,
    pub debug: DebugFlags,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            dev_mode: cfg!(debug_assertions),
            effect_strict_mode: EffectStrictMode::default(),
            debug: DebugFlags::default(),
        }
    }
}

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

fn config_cell() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::default()))
}

/// Read the current process-wide configuration.
pub fn config() -> RuntimeConfig {
    config_cell().read().clone()
}

/// Replace the process-wide configuration wholesale. Intended to be
/// called once at process/session startup.
pub fn configure(cfg: RuntimeConfig) {
    *config_cell().write() = cfg;
}

/// Mutate the process-wide configuration in place.
pub fn configure_with(f: impl FnOnce(&mut RuntimeConfig)) {
    f(&mut config_cell().write());
}

pub fn debug_mode() -> bool {
    config_cell().read().debug_mode
}

pub fn dev_mode() -> bool {
    config_cell().read().dev_mode
}

pub fn effect_strict_mode() -> EffectStrictMode {
    config_cell().read().effect_strict_mode
}
