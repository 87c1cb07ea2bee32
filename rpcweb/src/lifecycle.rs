use crate::browser::{self, UrlOpener};
use crate::config::LaunchSettings;
use crate::error::LaunchError;
use crate::locator::{self, SearchEnv};
use crate::output::{print_json, Console, JsonResult};
use crate::proxy::{self, ProxyProcess, StopOutcome};
use crate::server::StaticServer;
use chrono::{DateTime, Local};
use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    ProxyExited,
}

pub fn install_signal_handlers() -> Result<Arc<AtomicBool>, LaunchError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&shutdown)).map_err(|err| {
            LaunchError::Signal(format!("register handler for signal {signal}: {err}"))
        })?;
    }
    Ok(shutdown)
}

fn sleep_unless(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SHUTDOWN_CHECK.min(deadline - now));
    }
}

pub struct Launcher<O: UrlOpener> {
    settings: LaunchSettings,
    opener: O,
    console: Console,
    json: bool,
    shutdown: Arc<AtomicBool>,
    search: SearchEnv,
    proxy: Option<ProxyProcess>,
    server: Option<StaticServer>,
    state: LifecycleState,
    started_at: Option<DateTime<Local>>,
}

impl<O: UrlOpener> Launcher<O> {
    pub fn new(
        settings: LaunchSettings,
        search: SearchEnv,
        opener: O,
        json: bool,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            opener,
            console: Console::new(json),
            json,
            shutdown,
            search,
            proxy: None,
            server: None,
            state: LifecycleState::Idle,
            started_at: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn http_port(&self) -> u16 {
        self.server
            .as_ref()
            .map(StaticServer::port)
            .unwrap_or(self.settings.http_port)
    }

    pub fn url(&self) -> String {
        browser::ui_url(browser::UI_HOST, self.http_port(), self.settings.ws_port)
    }

    pub fn run(&mut self) -> Result<StopReason, LaunchError> {
        self.console.banner("RPC debug UI launcher");

        if let Err(err) = self.start() {
            self.stop();
            // Ctrl+C reaches the proxy too; its death is then not a failure.
            if self.shutdown_requested() {
                info!("interrupted during startup ({err})");
                return Ok(StopReason::Interrupted);
            }
            return Err(err);
        }
        if self.shutdown_requested() {
            info!("interrupted during startup");
            self.stop();
            return Ok(StopReason::Interrupted);
        }
        if let Err(err) = self.announce() {
            self.stop();
            return Err(err);
        }

        if self.settings.open_browser {
            let url = self.url();
            let delay = self.settings.timing.browser_delay();
            if let Err(err) =
                browser::open_ui(&self.opener, &url, self.http_port(), delay, &self.console)
            {
                if err.is_fatal() {
                    self.stop();
                    return Err(err);
                }
                debug!("continuing without a browser: {err}");
            }
        } else {
            info!("browser launch disabled");
        }

        self.console.banner("Services running; press Ctrl+C to stop");
        let reason = self.wait_for_stop();
        self.stop();
        Ok(reason)
    }

    fn start(&mut self) -> Result<(), LaunchError> {
        if !self.settings.web_dir.is_dir() {
            return Err(LaunchError::Config(format!(
                "web directory does not exist: {}",
                self.settings.web_dir.display()
            )));
        }
        self.state = LifecycleState::Starting;

        let binary = match &self.settings.proxy_binary {
            Some(path) => locator::locate_explicit(path)?,
            None => locator::locate(&self.search)?,
        };

        self.console.step("Starting WebSocket proxy");
        let args = proxy::proxy_args(
            &self.settings.rpc_host,
            self.settings.rpc_port,
            self.settings.ws_port,
        );
        self.console
            .detail("command", proxy::render_command(&binary, &args));
        self.console.detail(
            "route",
            format!(
                "ws://localhost:{} -> tcp://{}:{}",
                self.settings.ws_port, self.settings.rpc_host, self.settings.rpc_port
            ),
        );
        let proxy = ProxyProcess::start(
            &binary,
            &self.settings.rpc_host,
            self.settings.rpc_port,
            self.settings.ws_port,
            self.settings.timing.startup_grace(),
        )?;
        self.console
            .success(format!("proxy started (pid {})", proxy.pid()));
        self.proxy = Some(proxy);

        if self.shutdown_requested() {
            return Ok(());
        }

        self.console.step("Starting HTTP server");
        let server = StaticServer::start(&self.settings.web_dir, self.settings.http_port)?;
        self.console.detail("directory", server.root().display());
        self.console
            .detail("address", format!("http://localhost:{}", server.port()));
        self.console.success("HTTP server started");
        self.server = Some(server);

        self.state = LifecycleState::Running;
        self.started_at = Some(Local::now());
        Ok(())
    }

    pub fn summary(&self) -> serde_json::Value {
        json!({
            "state": self.state,
            "proxy_pid": self.proxy.as_ref().map(ProxyProcess::pid),
            "proxy_binary": self.proxy.as_ref().map(|proxy| proxy.binary().display().to_string()),
            "ws_url": format!("ws://localhost:{}", self.settings.ws_port),
            "rpc_target": format!("tcp://{}:{}", self.settings.rpc_host, self.settings.rpc_port),
            "http_port": self.http_port(),
            "web_dir": self.settings.web_dir,
            "url": self.url(),
            "browser": self.settings.open_browser,
            "started_at": self.started_at.map(|ts| ts.to_rfc3339()),
        })
    }

    fn announce(&self) -> Result<(), LaunchError> {
        if self.json {
            return print_json(&JsonResult::success(self.summary()));
        }
        info!("launcher running: {}", self.summary());
        Ok(())
    }

    fn wait_for_stop(&mut self) -> StopReason {
        let interval = self.settings.timing.poll_interval();
        loop {
            if self.shutdown_requested() {
                info!("interrupt received");
                return StopReason::Interrupted;
            }
            let exited = match self.proxy.as_mut() {
                Some(proxy) => match proxy.exit_status() {
                    Ok(None) => None,
                    Ok(Some(status)) => Some(status.to_string()),
                    Err(err) => Some(format!("status unavailable: {err}")),
                },
                None => Some("not started".to_string()),
            };
            if let Some(status) = exited {
                self.console
                    .warn(format!("websocat proxy exited ({status})"));
                return StopReason::ProxyExited;
            }
            sleep_unless(&self.shutdown, interval);
        }
    }

    // Proxy first, then the server. Idempotent.
    pub fn stop(&mut self) {
        if self.proxy.is_none() && self.server.is_none() {
            self.state = LifecycleState::Stopped;
            return;
        }
        self.state = LifecycleState::Stopping;
        self.console.step("Stopping services");

        if let Some(mut proxy) = self.proxy.take() {
            match proxy.stop(self.settings.timing.stop_timeout()) {
                Ok(StopOutcome::Graceful) => self.console.success("websocat proxy stopped"),
                Ok(StopOutcome::Killed) => self
                    .console
                    .warn("websocat proxy did not exit in time and was killed"),
                Ok(StopOutcome::AlreadyExited) => self.console.detail("proxy", "already exited"),
                Err(err) => self
                    .console
                    .warn(format!("failed to stop websocat proxy: {err}")),
            }
        }
        if let Some(mut server) = self.server.take() {
            server.stop();
            self.console.success("HTTP server stopped");
        }
        self.state = LifecycleState::Stopped;
    }
}

impl<O: UrlOpener> Drop for Launcher<O> {
    fn drop(&mut self) {
        self.stop();
    }
}
