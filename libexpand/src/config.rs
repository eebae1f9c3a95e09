//! Expansion controller configuration.
//!
//! Feature gates are plain fields handed to the reconciler and the
//! operation executor at construction; nothing reads global state.
//!
//! Environment variables read by [`ExpandConfig::from_env`]:
//! - `EXPAND_PERSISTENT_VOLUMES`: set to `0` to disable volume expansion.
//!   Defaults to `1` (enabled).
//! - `EXPAND_IN_USE_PERSISTENT_VOLUMES`: set to `0` to disable node-local
//!   filesystem expansion of mounted volumes. Defaults to `1` (enabled).
//! - `EXPAND_LOOP_PERIOD_MS`: reconciler tick period in milliseconds.
//!   Defaults to `100`.

use std::time::Duration;

const DEFAULT_LOOP_PERIOD: Duration = Duration::from_millis(100);
const DEFAULT_COMPONENT: &str = "volume-expand";

/// Configuration for the expansion controller.
#[derive(Debug, Clone)]
pub struct ExpandConfig {
    /// Gate for all volume expansion.  When off every request is treated as
    /// already done.
    pub expand_persistent_volumes: bool,
    /// Gate for the node-local filesystem grow of mounted volumes.
    pub expand_in_use_persistent_volumes: bool,
    /// Delay between reconciler ticks.
    pub loop_period: Duration,
    /// Event source name.
    pub component: String,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            expand_persistent_volumes: true,
            expand_in_use_persistent_volumes: true,
            loop_period: DEFAULT_LOOP_PERIOD,
            component: DEFAULT_COMPONENT.to_owned(),
        }
    }
}

impl ExpandConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            expand_persistent_volumes: lookup("EXPAND_PERSISTENT_VOLUMES")
                .map(|v| v != "0")
                .unwrap_or(defaults.expand_persistent_volumes),
            expand_in_use_persistent_volumes: lookup("EXPAND_IN_USE_PERSISTENT_VOLUMES")
                .map(|v| v != "0")
                .unwrap_or(defaults.expand_in_use_persistent_volumes),
            loop_period: lookup("EXPAND_LOOP_PERIOD_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.loop_period),
            component: defaults.component,
        }
    }

    /// Configuration with volume expansion switched off.
    pub fn disabled() -> Self {
        Self {
            expand_persistent_volumes: false,
            ..Self::default()
        }
    }
}
