//! Environment-driven SDK settings

use std::time::Duration;
use tracing::debug;

/// Default batch window for the update merger.
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 50;

/// Runtime knobs read from the environment.
///
/// All fields can also be set directly, which is what the tests do.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Emit per-frame debug logs (`ACP_VERBOSE=1`).
    pub verbose: bool,
    /// Emit structured timing metrics for requests, prompt turns and
    /// tool-call spans (`ACP_TIMING=1`).
    pub timing: bool,
    /// Coalesce streaming updates before delivery (`ACP_BATCHING`, default on;
    /// `0` disables).
    pub batching: bool,
    /// Merge window for the update batcher (`ACP_BATCH_MS`).
    pub batch_window: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        let settings = Self {
            verbose: env_flag("ACP_VERBOSE", false),
            timing: env_flag("ACP_TIMING", false),
            batching: env_flag("ACP_BATCHING", true),
            batch_window: Duration::from_millis(
                std::env::var("ACP_BATCH_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_BATCH_WINDOW_MS),
            ),
        };
        debug!(?settings, "loaded ACP settings");
        settings
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: false,
            timing: false,
            batching: true,
            batch_window: Duration::from_millis(DEFAULT_BATCH_WINDOW_MS),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v != "0" && !v.is_empty(),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(!s.verbose);
        assert!(s.batching);
        assert_eq!(s.batch_window, Duration::from_millis(50));
    }
}
