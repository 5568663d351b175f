use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::models::EntryTemplate;
use crate::error::{Result, SyncError};

/// Settings for the change monitor, loaded from TOML and the environment.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub entries: Vec<EntryTemplate>,
    pub state_file: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub interval_secs: u64,
    pub status_port: u16,
    pub probe: ProbeConfig,
    pub hooks: HooksConfig,
    pub dev_server: Option<DevServerConfig>,
}

impl MonitorConfig {
    pub const ENV_INTERVAL: &'static str = "IP_CHECK_INTERVAL";
    pub const ENV_DEBUG: &'static str = "DEBUG_IP_DETECTION";
    pub const ENV_OVERRIDE: &'static str = "HOST_IP_OVERRIDE";
    pub const ENV_HOST_IP: &'static str = "HOST_IP";

    pub const DEFAULT_ENV_FILE: &'static str = ".env";
    pub const DEFAULT_STATE_FILE: &'static str = "/tmp/last_known_ip";
    pub const DEFAULT_PID_FILE: &'static str = "/tmp/host-ip-sync.pid";
    pub const DEFAULT_LOG_FILE: &'static str = "/tmp/host-ip-sync.log";
    pub const DEFAULT_DEV_PID_FILE: &'static str = "/tmp/host-ip-sync-dev.pid";
    pub const DEFAULT_DEV_LOG_FILE: &'static str = "/tmp/host-ip-sync-dev.log";
    pub const DEFAULT_INTERVAL_SECS: u64 = 30;
    pub const DEFAULT_STATUS_PORT: u16 = 45460;
    pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 600;
    pub const STOP_GRACE_MS: u64 = 5000;

    /// Reads `path` if given, otherwise starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        Self::from_toml(&content, path)
    }

    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::ConfigParse {
            path: origin.to_path_buf(),
            details: e.to_string(),
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = lookup(Self::ENV_INTERVAL) else {
            return;
        };
        match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => self.interval_secs = secs,
            _ => log::warn!("Ignoring invalid {}={:?}", Self::ENV_INTERVAL, raw),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn status_port(&self) -> Option<u16> {
        (self.status_port != 0).then_some(self.status_port)
    }

    pub fn debug_requested<F>(lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(Self::ENV_DEBUG)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    fn default_entries() -> Vec<EntryTemplate> {
        vec![
            EntryTemplate::new(Self::DEFAULT_ENV_FILE, "APP_URL", "http://{ip}:8000"),
            EntryTemplate::new(Self::DEFAULT_ENV_FILE, "VITE_API_BASE_URL", "http://{ip}:8000/api"),
            EntryTemplate::new(Self::DEFAULT_ENV_FILE, "HOST_IP", "{ip}"),
        ]
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            entries: Self::default_entries(),
            state_file: PathBuf::from(Self::DEFAULT_STATE_FILE),
            pid_file: PathBuf::from(Self::DEFAULT_PID_FILE),
            log_file: PathBuf::from(Self::DEFAULT_LOG_FILE),
            interval_secs: Self::DEFAULT_INTERVAL_SECS,
            status_port: Self::DEFAULT_STATUS_PORT,
            probe: ProbeConfig::default(),
            hooks: HooksConfig::default(),
            dev_server: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub timeout_ms: u64,
    pub route_target: String,
    pub docker_host_name: String,
    pub route_table: PathBuf,
    pub docker_suffixes: Vec<u8>,
    pub reachability_ports: Vec<u16>,
    pub reachability_timeout_ms: u64,
}

impl ProbeConfig {
    pub const MIN_TIMEOUT_MS: u64 = 1000;
    pub const MAX_TIMEOUT_MS: u64 = 3000;

    /// Per-strategy budget, kept within 1-3 seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.clamp(Self::MIN_TIMEOUT_MS, Self::MAX_TIMEOUT_MS))
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            route_target: "8.8.8.8:80".to_string(),
            docker_host_name: "host.docker.internal".to_string(),
            route_table: PathBuf::from("/proc/net/route"),
            docker_suffixes: vec![2, 100, 101, 10, 50, 254],
            reachability_ports: vec![22, 80],
            reachability_timeout_ms: 150,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HookCommand {
    pub command: String,
    pub working_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HooksConfig {
    pub cache_clear: Option<HookCommand>,
    pub rebuild: Option<HookCommand>,
    pub timeout_secs: u64,
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            cache_clear: None,
            rebuild: None,
            timeout_secs: MonitorConfig::DEFAULT_HOOK_TIMEOUT_SECS,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DevServerConfig {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "DevServerConfig::default_pid_file")]
    pub pid_file: PathBuf,
    #[serde(default = "DevServerConfig::default_log_file")]
    pub log_file: PathBuf,
}

impl DevServerConfig {
    fn default_pid_file() -> PathBuf {
        PathBuf::from(MonitorConfig::DEFAULT_DEV_PID_FILE)
    }

    fn default_log_file() -> PathBuf {
        PathBuf::from(MonitorConfig::DEFAULT_DEV_LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_target_env_file() {
        let config = MonitorConfig::default();
        let keys: Vec<&str> = config.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["APP_URL", "VITE_API_BASE_URL", "HOST_IP"]);
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.status_port(), Some(45460));
        assert!(config.dev_server.is_none());
    }

    #[test]
    fn test_interval_env_override() {
        let mut config = MonitorConfig::default();
        config.apply_env(env(&[("IP_CHECK_INTERVAL", "5")]));
        assert_eq!(config.interval(), Duration::from_secs(5));

        config.apply_env(env(&[("IP_CHECK_INTERVAL", "soon")]));
        assert_eq!(config.interval(), Duration::from_secs(5));

        config.apply_env(env(&[("IP_CHECK_INTERVAL", "0")]));
        assert_eq!(config.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_debug_flag_values() {
        assert!(MonitorConfig::debug_requested(env(&[("DEBUG_IP_DETECTION", "1")])));
        assert!(MonitorConfig::debug_requested(env(&[("DEBUG_IP_DETECTION", "TRUE")])));
        assert!(!MonitorConfig::debug_requested(env(&[("DEBUG_IP_DETECTION", "0")])));
        assert!(!MonitorConfig::debug_requested(env(&[])));
    }

    #[test]
    fn test_probe_timeout_is_clamped() {
        let mut probe = ProbeConfig::default();
        probe.timeout_ms = 50;
        assert_eq!(probe.timeout(), Duration::from_secs(1));
        probe.timeout_ms = 60_000;
        assert_eq!(probe.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
            interval_secs = 10
            status_port = 0

            [[entries]]
            file = "frontend/.env"
            key = "VITE_API_BASE_URL"
            value = "http://{ip}:8080/api"

            [hooks]
            timeout_secs = 120
            rebuild = { command = "npm run build", working_dir = "frontend" }

            [dev_server]
            command = "npm run dev"
        "#;
        let config = MonitorConfig::from_toml(content, Path::new("test.toml")).unwrap();
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.status_port(), None);
        assert_eq!(config.entries.len(), 1);
        assert_eq!(config.entries[0].file, PathBuf::from("frontend/.env"));
        let rebuild = config.hooks.rebuild.unwrap();
        assert_eq!(rebuild.command, "npm run build");
        assert_eq!(rebuild.working_dir, Some(PathBuf::from("frontend")));
        assert!(config.hooks.cache_clear.is_none());
        let dev = config.dev_server.unwrap();
        assert_eq!(dev.pid_file, PathBuf::from(MonitorConfig::DEFAULT_DEV_PID_FILE));
        assert_eq!(config.state_file, PathBuf::from(MonitorConfig::DEFAULT_STATE_FILE));
    }

    #[test]
    fn test_unknown_field_is_config_parse_error() {
        let err = MonitorConfig::from_toml("intervall = 3", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, SyncError::ConfigParse { .. }));
        assert!(err.is_fatal());
    }
}
