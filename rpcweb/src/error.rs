use std::io;
use thiserror::Error;

pub const INSTALL_HINT: &str = "install websocat from https://github.com/vi/websocat/releases \
(linux: sudo mv websocat.x86_64-unknown-linux-musl /usr/local/bin/websocat && sudo chmod +x /usr/local/bin/websocat; \
macos: brew install websocat), or pass --proxy-bin <path>";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("proxy binary not found: {0}")]
    NotFound(String),
    #[error("proxy failed to start: {0}")]
    StartupFailure(String),
    #[error("port {port} is already in use; choose another port with --http-port")]
    PortInUse { port: u16 },
    #[error("failed to bind HTTP server on port {port}: {source}")]
    BindFailure {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("failed to open browser: {0}")]
    BrowserOpenFailure(String),
    #[error("signal error: {0}")]
    Signal(String),
    #[error("logger error: {0}")]
    Logger(#[from] log::SetLoggerError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LaunchError {
    pub fn code(&self) -> &'static str {
        match self {
            LaunchError::NotFound(_) => "proxy_not_found",
            LaunchError::StartupFailure(_) => "proxy_startup_failed",
            LaunchError::PortInUse { .. } => "port_in_use",
            LaunchError::BindFailure { .. } => "bind_failed",
            LaunchError::Config(_) => "config_error",
            LaunchError::BrowserOpenFailure(_) => "browser_open_failed",
            LaunchError::Signal(_) => "signal_error",
            LaunchError::Logger(_) => "logger_error",
            LaunchError::Io(_) => "io_error",
            LaunchError::Yaml(_) => "yaml_error",
            LaunchError::Json(_) => "json_error",
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            LaunchError::NotFound(_) => Some(INSTALL_HINT.to_string()),
            LaunchError::PortInUse { .. } => Some(
                "stop the process holding the port or pick another one with --http-port".to_string(),
            ),
            LaunchError::StartupFailure(_) => Some(
                "check that --ws-port is free and that the proxy binary runs on this host"
                    .to_string(),
            ),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, LaunchError::BrowserOpenFailure(_))
    }
}
