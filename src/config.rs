//! Configuration types.

use std::time::Duration;

/// Service configuration, read from `CHATFLOW_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Webhook server bind port.
    pub port: u16,
    /// Path to the libsql database file.
    pub db_path: String,
    /// Quiet period after the last inbound message before a batch fires.
    pub debounce_window: Duration,
    /// Hard cap on nodes executed in one flow invocation.
    pub max_flow_steps: usize,
    /// Completion retries after the first failed attempt.
    pub completion_retries: u32,
    /// Base delay for linear completion backoff (attempt N waits N * base).
    pub completion_backoff: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: "./data/chatflow.db".to_string(),
            debounce_window: Duration::from_secs(15),
            max_flow_steps: 256,
            completion_retries: 2,
            completion_backoff: Duration::from_secs(1),
        }
    }
}

impl AppConfig {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("CHATFLOW_PORT", defaults.port),
            db_path: std::env::var("CHATFLOW_DB_PATH").unwrap_or(defaults.db_path),
            debounce_window: Duration::from_secs(env_parse(
                "CHATFLOW_DEBOUNCE_SECS",
                defaults.debounce_window.as_secs(),
            )),
            max_flow_steps: env_parse("CHATFLOW_MAX_FLOW_STEPS", defaults.max_flow_steps),
            completion_retries: env_parse("CHATFLOW_COMPLETION_RETRIES", defaults.completion_retries),
            completion_backoff: Duration::from_secs(env_parse(
                "CHATFLOW_COMPLETION_BACKOFF_SECS",
                defaults.completion_backoff.as_secs(),
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.debounce_window, Duration::from_secs(15));
        assert_eq!(config.completion_retries, 2);
        assert!(config.max_flow_steps > 0);
    }
}
