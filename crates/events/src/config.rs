//! Event bus configuration.

use serde::Deserialize;

/// Environment variable overriding [`BusConfig::parallelism`].
pub const PARALLELISM_ENV: &str = "HERALD_PARALLELISM";

/// Environment variable overriding [`BusConfig::thread_name`].
pub const THREAD_NAME_ENV: &str = "HERALD_THREAD_NAME";

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Name used in log fields.
    pub name: String,
    /// Number of pool workers running notifications.
    pub parallelism: usize,
    /// Thread name prefix for pool workers (owned pools only).
    pub thread_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "event-bus".to_string(),
            parallelism: default_parallelism(),
            thread_name: "herald-notify".to_string(),
        }
    }
}

impl BusConfig {
    /// Defaults, overridden by `HERALD_PARALLELISM` / `HERALD_THREAD_NAME` when set.
    ///
    /// Unparseable or zero parallelism values are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = var(PARALLELISM_ENV)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.parallelism = n;
        }

        if let Some(name) = var(THREAD_NAME_ENV) {
            if !name.trim().is_empty() {
                config.thread_name = name;
            }
        }

        config
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
