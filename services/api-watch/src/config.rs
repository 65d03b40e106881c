//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is read from `API_WATCH_PASSWORD` only, never from
//! the TOML, to avoid leaking secrets.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::Secret;
use poller::PollConfig;
use resilience::RetryPolicy;
use serde::Deserialize;
use transport::HeaderInjection;

/// Env var holding the password for `api-watch login`.
pub const PASSWORD_ENV: &str = "API_WATCH_PASSWORD";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
    #[serde(default)]
    pub poll: Vec<PollTarget>,
}

/// Backend API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where the token pair is persisted
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_path")]
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

/// Status server (`/health`, `/metrics`); disabled when `listen_addr` is unset
#[derive(Debug, Default, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

/// One polled endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PollTarget {
    pub name: String,
    pub path: String,
    #[serde(flatten)]
    pub interval: PollConfig,
}

fn default_timeout() -> u64 {
    30
}

fn default_session_path() -> PathBuf {
    PathBuf::from("api-watch-session.json")
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        self.retry.validate()?;

        let mut names = HashSet::new();
        for target in &self.poll {
            if target.name.trim().is_empty() {
                return Err(common::Error::Config("poll name must not be empty".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate poll name: {}",
                    target.name
                )));
            }
            if !target.path.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "poll path for {} must start with '/', got: {}",
                    target.name, target.path
                )));
            }
            target.interval.validate()?;
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-watch.toml")
    }
}

/// Read the login password from the environment.
pub fn login_password() -> common::Result<Secret<String>> {
    match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Ok(Secret::new(password)),
        _ => Err(common::Error::Config(format!(
            "{PASSWORD_ENV} must be set to log in"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-watch.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn valid_toml() -> &'static str {
        r#"
[api]
base_url = "https://notes.example.com/api/v1"

[retry]
max_retries = 5
jitter_percent = 10

[session]
path = "/var/lib/api-watch/session.json"

[status]
listen_addr = "127.0.0.1:9464"

[[headers]]
name = "x-client"
value = "api-watch"

[[poll]]
name = "documents"
path = "/documents"
base_interval_ms = 2000

[[poll]]
name = "sessions"
path = "/sessions"
base_interval_ms = 5000
max_interval_ms = 60000
backoff_multiplier = 1.5
"#
    }

    #[test]
    fn test_load_valid_config() {
        let (_dir, path) = write_config(valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://notes.example.com/api/v1");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.jitter_percent, 10);
        assert_eq!(config.retry.base_delay_ms, 1000, "unset fields keep defaults");
        assert_eq!(
            config.session.path,
            PathBuf::from("/var/lib/api-watch/session.json")
        );
        assert_eq!(
            config.status.listen_addr,
            Some("127.0.0.1:9464".parse().unwrap())
        );
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].name, "x-client");

        assert_eq!(config.poll.len(), 2);
        assert_eq!(config.poll[0].name, "documents");
        assert_eq!(config.poll[0].interval.base_interval, Duration::from_secs(2));
        assert_eq!(config.poll[0].interval.max_interval, Duration::from_secs(30));
        assert_eq!(config.poll[1].interval.max_interval, Duration::from_secs(60));
        assert_eq!(config.poll[1].interval.multiplier, 1.5);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_dir, path) = write_config("[api]\nbase_url = \"http://localhost:8000\"\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.session.path, PathBuf::from("api-watch-session.json"));
        assert!(config.status.listen_addr.is_none());
        assert!(config.headers.is_empty());
        assert!(config.poll.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/api-watch.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let (_dir, path) = write_config("not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let (_dir, path) = write_config("[api]\nbase_url = \"notes.example.com\"\n");

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (_dir, path) =
            write_config("[api]\nbase_url = \"http://localhost\"\ntimeout_secs = 0\n");
        assert!(Config::load(&path).is_err(), "timeout_secs = 0 must be rejected");
    }

    #[test]
    fn test_invalid_retry_policy_rejected() {
        let (_dir, path) = write_config(
            r#"
[api]
base_url = "http://localhost"

[retry]
base_delay_ms = 5000
max_delay_ms = 1000
"#,
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("max_delay_ms"), "got: {err}");
    }

    #[test]
    fn test_duplicate_poll_names_rejected() {
        let (_dir, path) = write_config(
            r#"
[api]
base_url = "http://localhost"

[[poll]]
name = "documents"
path = "/documents"
base_interval_ms = 1000

[[poll]]
name = "documents"
path = "/documents/recent"
base_interval_ms = 1000
"#,
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("duplicate poll name"), "got: {err}");
    }

    #[test]
    fn test_relative_poll_path_rejected() {
        let (_dir, path) = write_config(
            r#"
[api]
base_url = "http://localhost"

[[poll]]
name = "documents"
path = "documents"
base_interval_ms = 1000
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let (_dir, path) = write_config(
            r#"
[api]
base_url = "http://localhost"

[[poll]]
name = "documents"
path = "/documents"
base_interval_ms = 0
"#,
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("base_interval_ms"), "got: {err}");
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("api-watch.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_login_password_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env(PASSWORD_ENV, "hunter2") };
        let password = login_password().unwrap();
        assert!(password.matches("hunter2"));
        unsafe { remove_env(PASSWORD_ENV) };
    }

    #[test]
    fn test_login_password_missing() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(PASSWORD_ENV) };
        let err = login_password().unwrap_err().to_string();
        assert!(err.contains(PASSWORD_ENV), "got: {err}");
    }
}
