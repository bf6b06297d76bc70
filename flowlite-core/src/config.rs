use serde::{Deserialize, Serialize};

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on routing steps inside a single operation. Guards against
    /// gateway cycles that never reach a wait state.
    pub max_steps: usize,
    /// Upper bound on cross-instance global signal propagation rounds.
    pub max_signal_rounds: usize,
    /// Keep the per-instance audit trail of runtime events.
    pub record_history: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_signal_rounds: 64,
            record_history: true,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Defaults overridden by `FLOWLITE_MAX_STEPS`, `FLOWLITE_MAX_SIGNAL_ROUNDS`
    /// and `FLOWLITE_RECORD_HISTORY`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("FLOWLITE_MAX_STEPS").and_then(|s| s.parse().ok()) {
            config.max_steps = v;
        }
        if let Some(v) = lookup("FLOWLITE_MAX_SIGNAL_ROUNDS").and_then(|s| s.parse().ok()) {
            config.max_signal_rounds = v;
        }
        if let Some(v) = lookup("FLOWLITE_RECORD_HISTORY").and_then(|s| s.parse().ok()) {
            config.record_history = v;
        }
        config
    }
}
