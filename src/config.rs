use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::watcher::{WatcherSettings, DEFAULT_DELAYS};

const DEFAULT_ENV_PREFIX: &str = "THREAD_WATCH";
const APP_DIR: &str = "thread-watch";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_user_agent() -> String {
    format!("thread-watch/{}", crate::VERSION)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatcherConfig {
    /// Poll delays in seconds, shortest first.
    #[serde(default = "default_delays")]
    pub delays: Vec<u64>,
    #[serde(default = "default_hidden_floor", with = "humantime_serde")]
    pub hidden_floor: Duration,
    #[serde(default = "default_status_tick", with = "humantime_serde")]
    pub status_tick: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            delays: default_delays(),
            hidden_floor: default_hidden_floor(),
            status_tick: default_status_tick(),
        }
    }
}

impl WatcherConfig {
    pub fn settings(&self) -> WatcherSettings {
        WatcherSettings {
            delays: self.delays.clone(),
            hidden_floor: self.hidden_floor,
            status_tick: self.status_tick,
        }
    }
}

fn default_delays() -> Vec<u64> {
    DEFAULT_DELAYS.to_vec()
}

fn default_hidden_floor() -> Duration {
    Duration::from_secs(60)
}

fn default_status_tick() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl LogConfig {
    pub fn path(&self) -> Option<PathBuf> {
        self.file.clone().or_else(default_log_path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        ensure!(path.exists(), "config: file {} not found", path.display());
        cfg = merge_config(cfg, read_config_file(path)?);
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = merge_config(cfg, read_config_file(&default_path)?);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    validate(&cfg)?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: read file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("config: parse file {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.server.base_url.is_empty() {
        base.server.base_url = other.server.base_url;
    }
    if !other.server.user_agent.is_empty() {
        base.server.user_agent = other.server.user_agent;
    }
    base.server.request_timeout = other.server.request_timeout;

    if !other.watcher.delays.is_empty() {
        base.watcher.delays = other.watcher.delays;
    }
    base.watcher.hidden_floor = other.watcher.hidden_floor;
    base.watcher.status_tick = other.watcher.status_tick;

    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }
    if !other.log.filter.is_empty() {
        base.log.filter = other.log.filter;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.base_url" => cfg.server.base_url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.server.request_timeout = duration;
            }
        }
        "watcher.delays" => {
            let parsed: Result<Vec<u64>, _> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(delays) if !delays.is_empty() => cfg.watcher.delays = delays,
                _ => tracing::warn!(%value, "config: ignoring malformed watcher.delays"),
            }
        }
        "watcher.hidden_floor" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.watcher.hidden_floor = duration;
            }
        }
        "watcher.status_tick" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.watcher.status_tick = duration;
            }
        }
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        "log.filter" => cfg.log.filter = value,
        _ => {}
    }
}

pub fn validate(cfg: &Config) -> Result<()> {
    let delays = &cfg.watcher.delays;
    ensure!(!delays.is_empty(), "config: watcher.delays must not be empty");
    ensure!(
        delays.iter().all(|delay| *delay > 0),
        "config: watcher.delays entries must be positive"
    );
    ensure!(
        delays.windows(2).all(|pair| pair[0] <= pair[1]),
        "config: watcher.delays must be ascending"
    );
    ensure!(
        !cfg.watcher.hidden_floor.is_zero(),
        "config: watcher.hidden_floor must be positive"
    );
    ensure!(
        !cfg.watcher.status_tick.is_zero(),
        "config: watcher.status_tick must be positive"
    );
    ensure!(
        !cfg.server.user_agent.trim().is_empty(),
        "config: server.user_agent is required"
    );
    Ok(())
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
}

fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(APP_DIR).join("thread-watch.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            env_prefix: Some("THREAD_WATCH_TEST_DEFAULTS".into()),
            ..LoadOptions::default()
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, "http://localhost:5000");
        assert_eq!(cfg.server.request_timeout, Duration::from_secs(20));
        assert_eq!(cfg.watcher.delays, DEFAULT_DELAYS.to_vec());
        assert_eq!(cfg.watcher.settings(), WatcherSettings::default());
    }

    #[test]
    fn reads_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  base_url: https://chan.example\n  request_timeout: 5s\nwatcher:\n  delays: [5, 10]\n  hidden_floor: 2m\n",
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("THREAD_WATCH_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, "https://chan.example");
        assert_eq!(cfg.server.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.watcher.delays, vec![5, 10]);
        assert_eq!(cfg.watcher.hidden_floor, Duration::from_secs(120));
        assert_eq!(cfg.watcher.status_tick, Duration::from_secs(1));
        assert_eq!(cfg.log.filter, "info");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = load(LoadOptions {
            config_file: Some(dir.path().join("absent.yaml")),
            env_prefix: Some("THREAD_WATCH_TEST_ABSENT".into()),
        });
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("THREAD_WATCH_TEST_ENV_WATCHER__DELAYS", "3, 6, 9");
        env::set_var("THREAD_WATCH_TEST_ENV_SERVER__BASE_URL", "http://board.local");
        let cfg = load(LoadOptions {
            env_prefix: Some("THREAD_WATCH_TEST_ENV".into()),
            ..LoadOptions::default()
        })
        .unwrap();
        assert_eq!(cfg.watcher.delays, vec![3, 6, 9]);
        assert_eq!(cfg.server.base_url, "http://board.local");
        env::remove_var("THREAD_WATCH_TEST_ENV_WATCHER__DELAYS");
        env::remove_var("THREAD_WATCH_TEST_ENV_SERVER__BASE_URL");
    }

    #[test]
    fn validation_rejects_bad_ladders() {
        let mut cfg = Config::default();
        cfg.watcher.delays = vec![30, 10];
        assert!(validate(&cfg).is_err());
        cfg.watcher.delays.clear();
        assert!(validate(&cfg).is_err());
        cfg.watcher.delays = vec![10];
        cfg.watcher.hidden_floor = Duration::ZERO;
        assert!(validate(&cfg).is_err());
    }
}
