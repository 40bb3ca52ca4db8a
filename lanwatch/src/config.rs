use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG: &str = "lanwatch.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct PortScanConfig {
    pub enabled: Option<bool>,
    pub range: Option<String>,
    pub timeout_ms: Option<u64>,
    pub threads: Option<usize>,
    pub interval_seconds: Option<u64>,
    pub retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ProbeConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub network_range: Option<String>,
    pub interface: Option<String>,
    pub database: Option<PathBuf>,
    pub oui_file: Option<PathBuf>,
    pub oui_url: Option<String>,
    pub custom_oui_file: Option<PathBuf>,
    pub scan_state_file: Option<PathBuf>,
    pub history_retention_days: Option<i64>,
    pub port_scan: Option<PortScanConfig>,
    pub discovery: Option<ProbeConfig>,
    pub reachability: Option<ProbeConfig>,
}

/// Problems that stop a run before anything is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("network_range is not configured (set it in {DEFAULT_CONFIG} or pass --network)")]
    MissingNetworkRange,
    #[error("network_range {0:?} is not a valid IPv4 CIDR or address")]
    InvalidNetworkRange(String),
    #[error("database path is empty")]
    MissingDatabase,
}

/// Read the YAML config. An explicit path must exist; the default
/// `./lanwatch.yaml` is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else {
                debug!("no config file, using defaults");
                return Ok(Config::default());
            }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("read config {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parse config {}", path.display()))
}

pub fn parse_config(yaml: &str) -> Result<Config> {
    if yaml.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

#[derive(Debug, Clone)]
pub struct PortScanSettings {
    pub enabled: bool,
    pub range: String,
    pub timeout: Duration,
    pub threads: usize,
    pub interval: Duration,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub retries: u32,
}

/// Effective settings: CLI overrides, then file values, then defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub network_range: Option<String>,
    pub interface: Option<String>,
    pub database: PathBuf,
    pub oui_file: PathBuf,
    pub oui_url: String,
    pub custom_oui_file: PathBuf,
    pub scan_state_file: PathBuf,
    pub history_retention_days: i64,
    pub port_scan: PortScanSettings,
    pub discovery: ProbeSettings,
    pub reachability: ProbeSettings,
}

#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub network: Option<String>,
    pub database: Option<PathBuf>,
}

fn positive_u64(value: Option<u64>, key: &str, default: u64) -> u64 {
    match value {
        Some(0) => {
            warn!(key, default, "zero is not allowed, using default");
            default
        }
        Some(v) => v,
        None => default,
    }
}

impl Settings {
    pub fn resolve(cfg: Config, overrides: Overrides) -> Self {
        let ps = cfg.port_scan.unwrap_or_default();
        let disc = cfg.discovery.unwrap_or_default();
        let reach = cfg.reachability.unwrap_or_default();
        let threads = positive_u64(ps.threads.map(|t| t as u64), "port_scan.threads", 20) as usize;
        Settings {
            network_range: overrides.network.or(cfg.network_range).filter(|s| !s.trim().is_empty()),
            interface: cfg.interface.filter(|s| !s.trim().is_empty()),
            database: overrides.database.or(cfg.database).unwrap_or_else(|| PathBuf::from("lanwatch.db")),
            oui_file: cfg.oui_file.unwrap_or_else(|| PathBuf::from("oui.txt")),
            oui_url: cfg.oui_url.unwrap_or_else(|| "https://standards-oui.ieee.org/oui/oui.txt".to_string()),
            custom_oui_file: cfg.custom_oui_file.unwrap_or_else(|| PathBuf::from("custom_oui.txt")),
            scan_state_file: cfg.scan_state_file.unwrap_or_else(|| PathBuf::from("last_port_scan.ts")),
            history_retention_days: cfg.history_retention_days.unwrap_or(90),
            port_scan: PortScanSettings {
                enabled: ps.enabled.unwrap_or(false),
                range: ps.range.unwrap_or_else(|| "1-1024".to_string()),
                timeout: Duration::from_millis(positive_u64(ps.timeout_ms, "port_scan.timeout_ms", 500)),
                threads,
                interval: Duration::from_secs(positive_u64(ps.interval_seconds, "port_scan.interval_seconds", 300)),
                retries: ps.retries.unwrap_or(0),
            },
            discovery: ProbeSettings {
                timeout: Duration::from_millis(positive_u64(disc.timeout_ms, "discovery.timeout_ms", 2000)),
                retries: disc.retries.unwrap_or(1),
            },
            reachability: ProbeSettings {
                timeout: Duration::from_millis(positive_u64(reach.timeout_ms, "reachability.timeout_ms", 1000)),
                retries: reach.retries.unwrap_or(2),
            },
        }
    }

    /// Checks that must pass before a run touches the network or the store.
    /// Returns the normalized network range.
    pub fn validate_for_run(&self) -> Result<String, ConfigError> {
        let raw = self.network_range.as_deref().ok_or(ConfigError::MissingNetworkRange)?;
        let net = host_discovery::parse_subnet(raw).map_err(|_| ConfigError::InvalidNetworkRange(raw.to_string()))?;
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatabase);
        }
        Ok(net.to_string())
    }
}
