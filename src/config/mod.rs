pub mod error;
pub mod load;

pub use error::ConfigError;
pub use load::{apply_env_overrides, load_client_config};

use crate::session::SessionContext;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const API_BASE_ENV: &str = "TESTDECK_API_BASE";
pub const CONFIG_PATH_ENV: &str = "TESTDECK_CONFIG";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RECONNECT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_BACKOFF_MS: u64 = 10_000;

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT_MS
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_RECONNECT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_BACKOFF_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub session: Option<SessionContext>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            request_timeout_ms: default_request_timeout_ms(),
            stream: StreamConfig::default(),
            log_path: None,
            session: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// A stream that delivers no bytes for this long is treated as
    /// disconnected. Also bounds how long a cancelled reader holds its
    /// connection.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Reconnect behavior for a dropped event stream. `max_attempts: 0` keeps
/// the plain contract: the first disconnect is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ReconnectPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Exponential backoff for the zero-based `attempt`, capped at
    /// `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

impl ClientConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let api_base = self.api_base.trim();
        if api_base.is_empty() {
            return Err(ConfigError::Invalid("`api_base` must be non-empty".to_string()));
        }
        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "`api_base` must be an http(s) url, got `{api_base}`"
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "`request_timeout_ms` must be greater than 0".to_string(),
            ));
        }
        if self.stream.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "`stream.idle_timeout_ms` must be greater than 0".to_string(),
            ));
        }
        let reconnect = &self.stream.reconnect;
        if reconnect.is_enabled() {
            if reconnect.initial_backoff_ms == 0 {
                return Err(ConfigError::Invalid(
                    "`stream.reconnect.initial_backoff_ms` must be greater than 0".to_string(),
                ));
            }
            if reconnect.max_backoff_ms < reconnect.initial_backoff_ms {
                return Err(ConfigError::Invalid(
                    "`stream.reconnect.max_backoff_ms` must be >= `initial_backoff_ms`"
                        .to_string(),
                ));
            }
        }
        if let Some(session) = self.session.as_ref() {
            if session.tenant_id().trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "`session.tenant_id` must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: ClientConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!(!config.stream.reconnect.is_enabled());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn yaml_fields_override_defaults() {
        let config: ClientConfig = serde_yaml::from_str(
            r#"
api_base: https://orchestrator.internal
request_timeout_ms: 2000
stream:
  idle_timeout_ms: 5000
  reconnect:
    max_attempts: 3
log_path: /tmp/testdeck.log
session:
  user: alice
  email: alice@example.com
  tenant_id: t_demo
"#,
        )
        .expect("parse");

        assert_eq!(config.api_base, "https://orchestrator.internal");
        assert_eq!(config.stream.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.stream.reconnect.max_attempts, 3);
        assert_eq!(
            config.stream.reconnect.initial_backoff_ms,
            DEFAULT_RECONNECT_INITIAL_BACKOFF_MS
        );
        let session = config.session.as_ref().expect("session");
        assert_eq!(session.tenant_id(), "t_demo");
        config.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_non_http_base_and_zero_timeouts() {
        let mut config = ClientConfig {
            api_base: "ftp://nope".to_string(),
            ..ClientConfig::default()
        };
        let err = config.validate().expect_err("scheme rejected");
        assert!(err.to_string().contains("http(s) url"));

        config.api_base = DEFAULT_API_BASE.to_string();
        config.stream.idle_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.stream.idle_timeout_ms = 10;
        config.stream.reconnect = ReconnectPolicy {
            max_attempts: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 100,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn load_reads_file_and_applies_env_override() {
        let _env_guard = ENV_LOCK.lock().expect("env lock");
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("testdeck.yaml");
        fs::write(&path, "api_base: http://from-file:9000\n").expect("write config");

        std::env::remove_var(API_BASE_ENV);
        let config = load_client_config(Some(&path)).expect("load");
        assert_eq!(config.api_base, "http://from-file:9000");

        std::env::set_var(API_BASE_ENV, "http://from-env:9100");
        let config = load_client_config(Some(&path)).expect("load with env");
        assert_eq!(config.api_base, "http://from-env:9100");
        std::env::remove_var(API_BASE_ENV);
    }

    #[test]
    fn load_reports_missing_file_path() {
        let _env_guard = ENV_LOCK.lock().expect("env lock");
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("absent.yaml");
        let err = load_client_config(Some(&missing)).expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.yaml"));
    }
}
