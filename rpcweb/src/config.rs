use crate::error::LaunchError;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "RPCWEB_CONFIG";
pub const CONFIG_DIR_ENV: &str = "RPCWEB_CONFIG_DIR";
pub const MAX_TIMING_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub rpc: RpcConfig,
    pub proxy: ProxyConfig,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub ws_port: u16,
    pub binary: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub port: u16,
    pub web_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub open: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub startup_grace_ms: u64,
    pub browser_delay_ms: u64,
    pub stop_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            rpc: RpcConfig::default(),
            proxy: ProxyConfig::default(),
            http: HttpConfig::default(),
            browser: BrowserConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 12345,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ws_port: 12346,
            binary: String::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            web_dir: String::new(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { open: true }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: 500,
            browser_delay_ms: 500,
            stop_timeout_ms: 5000,
            poll_interval_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn browser_delay(&self) -> Duration {
        Duration::from_millis(self.browser_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub explicit: bool,
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("rpcweb");
    base
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> ConfigLocation {
    if let Some(path) = override_path {
        return ConfigLocation {
            path: path.clone(),
            explicit: true,
        };
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return ConfigLocation {
                path: PathBuf::from(path),
                explicit: true,
            };
        }
    }
    ConfigLocation {
        path: default_config_dir().join("config.yaml"),
        explicit: false,
    }
}

pub fn default_config_yaml() -> &'static str {
    DEFAULT_CONFIG_YAML
}

pub fn read_config_from_str(content: &str) -> Result<Config, LaunchError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != CONFIG_VERSION {
        return Err(LaunchError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<Config, LaunchError> {
    let content = fs::read_to_string(path).map_err(|err| {
        LaunchError::Config(format!("failed to read {}: {err}", path.display()))
    })?;
    read_config_from_str(&content)
}

// A missing file is only an error when the user pointed at it.
pub fn load_config(location: &ConfigLocation) -> Result<Config, LaunchError> {
    if location.path.exists() {
        return read_config(&location.path);
    }
    if location.explicit {
        return Err(LaunchError::Config(format!(
            "config file {} does not exist",
            location.path.display()
        )));
    }
    Ok(Config::default())
}

pub fn validate_config(cfg: &Config) -> Result<(), LaunchError> {
    if cfg.rpc.host.trim().is_empty() {
        return Err(LaunchError::Config("rpc.host must be non-empty".to_string()));
    }
    if cfg.rpc.host.contains(char::is_whitespace) {
        return Err(LaunchError::Config(
            "rpc.host must not contain whitespace".to_string(),
        ));
    }
    for (field, port) in [
        ("rpc.port", cfg.rpc.port),
        ("proxy.ws_port", cfg.proxy.ws_port),
        ("http.port", cfg.http.port),
    ] {
        if port == 0 {
            return Err(LaunchError::Config(format!(
                "{field} must be greater than 0"
            )));
        }
    }
    if cfg.proxy.ws_port == cfg.http.port {
        return Err(LaunchError::Config(format!(
            "proxy.ws_port and http.port must differ (both {})",
            cfg.http.port
        )));
    }
    for (field, value) in [
        ("timing.startup_grace_ms", cfg.timing.startup_grace_ms),
        ("timing.stop_timeout_ms", cfg.timing.stop_timeout_ms),
        ("timing.poll_interval_ms", cfg.timing.poll_interval_ms),
    ] {
        if value == 0 {
            return Err(LaunchError::Config(format!(
                "{field} must be greater than 0"
            )));
        }
    }
    for (field, value) in [
        ("timing.startup_grace_ms", cfg.timing.startup_grace_ms),
        ("timing.browser_delay_ms", cfg.timing.browser_delay_ms),
        ("timing.stop_timeout_ms", cfg.timing.stop_timeout_ms),
        ("timing.poll_interval_ms", cfg.timing.poll_interval_ms),
    ] {
        if value > MAX_TIMING_MS {
            return Err(LaunchError::Config(format!(
                "{field} must be at most {MAX_TIMING_MS} (one hour)"
            )));
        }
    }
    Ok(())
}

pub fn expand_path(input: &str) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    if input == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    PathBuf::from(input)
}

fn absolutize(path: PathBuf, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

pub fn default_web_dir() -> PathBuf {
    if let Ok(exe) = env::current_exe() {
        let resolved = fs::canonicalize(&exe).unwrap_or(exe);
        if let Some(parent) = resolved.parent() {
            return parent.to_path_buf();
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub host: Option<String>,
    pub rpc_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub http_port: Option<u16>,
    pub web_dir: Option<PathBuf>,
    pub proxy_bin: Option<PathBuf>,
    pub no_browser: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LaunchSettings {
    pub rpc_host: String,
    pub rpc_port: u16,
    pub ws_port: u16,
    pub http_port: u16,
    pub web_dir: PathBuf,
    pub proxy_binary: Option<PathBuf>,
    pub open_browser: bool,
    pub timing: TimingConfig,
}

impl LaunchSettings {
    pub fn resolve(
        cfg: &Config,
        config_path: &Path,
        overrides: &LaunchOverrides,
    ) -> Result<Self, LaunchError> {
        let cwd = env::current_dir()?;
        let config_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.clone());

        let rpc_host = overrides
            .host
            .clone()
            .unwrap_or_else(|| cfg.rpc.host.clone());
        if rpc_host.trim().is_empty() {
            return Err(LaunchError::Config("--host must be non-empty".to_string()));
        }

        let web_dir = match (&overrides.web_dir, cfg.http.web_dir.trim()) {
            (Some(dir), _) => absolutize(dir.clone(), &cwd),
            (None, "") => default_web_dir(),
            (None, configured) => absolutize(expand_path(configured), &config_dir),
        };

        let proxy_binary = match (&overrides.proxy_bin, cfg.proxy.binary.trim()) {
            (Some(bin), _) => Some(absolutize(bin.clone(), &cwd)),
            (None, "") => None,
            (None, configured) => Some(absolutize(expand_path(configured), &config_dir)),
        };

        let settings = Self {
            rpc_host,
            rpc_port: overrides.rpc_port.unwrap_or(cfg.rpc.port),
            ws_port: overrides.ws_port.unwrap_or(cfg.proxy.ws_port),
            http_port: overrides.http_port.unwrap_or(cfg.http.port),
            web_dir,
            proxy_binary,
            open_browser: cfg.browser.open && !overrides.no_browser,
            timing: cfg.timing,
        };
        if settings.ws_port == settings.http_port {
            return Err(LaunchError::Config(format!(
                "--ws-port and --http-port must differ (both {})",
                settings.http_port
            )));
        }
        Ok(settings)
    }
}
