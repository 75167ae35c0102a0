use crate::errors::GuideError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Delays and timeouts used by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long `show` keeps a target outlined (milliseconds)
    pub highlight_duration_ms: u64,

    /// Pause between the `show` and `do` phases of one action (milliseconds)
    pub settle_delay_ms: u64,

    /// Pause between consecutive steps of a section run (milliseconds)
    pub inter_step_delay_ms: u64,

    /// Upper bound for a single requirement check (milliseconds)
    pub requirement_timeout_ms: u64,

    /// Coalescing window of the reactive re-check scheduler (milliseconds)
    pub reactive_check_window_ms: u64,

    /// How often the URL poller samples the current path (milliseconds)
    pub url_poll_interval_ms: u64,

    /// Wait after a requirement fix before re-checking (milliseconds)
    pub fix_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            highlight_duration_ms: 2000,
            settle_delay_ms: 800,
            inter_step_delay_ms: 1000,
            requirement_timeout_ms: 3000,
            reactive_check_window_ms: 500,
            url_poll_interval_ms: 1000,
            fix_settle_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn highlight_duration(&self) -> Duration {
        Duration::from_millis(self.highlight_duration_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_step_delay(&self) -> Duration {
        Duration::from_millis(self.inter_step_delay_ms)
    }

    pub fn requirement_timeout(&self) -> Duration {
        Duration::from_millis(self.requirement_timeout_ms)
    }

    pub fn reactive_check_window(&self) -> Duration {
        Duration::from_millis(self.reactive_check_window_ms)
    }

    pub fn url_poll_interval(&self) -> Duration {
        Duration::from_millis(self.url_poll_interval_ms)
    }

    pub fn fix_settle(&self) -> Duration {
        Duration::from_millis(self.fix_settle_ms)
    }
}

/// Requirement retry policy of the step checker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Selectors for the host application's navigation chrome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationSelectors {
    /// The navigation menu container, present while the menu is open
    pub menu: String,
    /// Button that opens the menu
    pub toggle: String,
    /// Button that docks the open menu
    pub dock: String,
    /// Present while the menu is docked
    pub docked: String,
    /// Expand control inside a collapsed menu section
    pub expand_section: String,
}

impl Default for NavigationSelectors {
    fn default() -> Self {
        Self {
            menu: "[data-testid=\"data-testid navigation mega-menu\"]".to_string(),
            toggle: "[data-testid=\"data-testid Toggle menu\"]".to_string(),
            dock: "#dock-menu-button".to_string(),
            docked: "[data-testid=\"data-testid navigation mega-menu\"][data-docked=\"true\"]"
                .to_string(),
            expand_section: "button[aria-label*=\"Expand section\"]".to_string(),
        }
    }
}

/// Configuration for the guide engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub retry: RetryConfig,
    pub navigation: NavigationSelectors,

    /// Page mutations trigger a re-check only when the mutated element or an
    /// ancestor carries one of these words in its id, class, test id, href or
    /// label. Case-insensitive.
    pub observed_subtree_keywords: Vec<String>,

    /// Capacity of the signal and state-change broadcast channels
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
            navigation: NavigationSelectors::default(),
            observed_subtree_keywords: ["nav", "menu", "plugin", "connection", "datasource"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            channel_capacity: 128,
        }
    }
}

impl EngineConfig {
    /// Short delays for headless hosts and tests.
    pub fn fast() -> EngineConfig {
        EngineConfig {
            timing: TimingConfig {
                highlight_duration_ms: 50,
                settle_delay_ms: 10,
                inter_step_delay_ms: 10,
                requirement_timeout_ms: 500,
                reactive_check_window_ms: 50,
                url_poll_interval_ms: 50,
                fix_settle_ms: 10,
            },
            retry: RetryConfig {
                max_retries: 1,
                retry_delay_ms: 10,
            },
            ..EngineConfig::default()
        }
    }

    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<EngineConfig, GuideError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GuideError::InvalidArgument(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            GuideError::InvalidArgument(format!("invalid config {}: {e}", path.display()))
        })
    }
}
