//! Configuration presets for integration tests

use provider_fanout::{Config, FanOutConfig, PollingConfig};
use std::time::Duration;

/// Defaults with a per-call timeout suited to scripted providers
pub fn fan_out_config(per_call_timeout: Duration) -> FanOutConfig {
    FanOutConfig {
        per_call_timeout,
        ..Default::default()
    }
}

/// Polling settings; callers pick whether they must pass validation
pub fn polling_config(poll_interval: Duration, max_wait: Duration) -> PollingConfig {
    PollingConfig {
        poll_interval,
        max_wait,
        ..Default::default()
    }
}

/// Smallest valid configuration for orchestrator tests
pub fn fast_config() -> Config {
    Config {
        fan_out: fan_out_config(Duration::from_secs(5)),
        polling: polling_config(Duration::from_secs(1), Duration::from_secs(30)),
    }
}
