use crate::error::LaunchError;
use crate::output::Console;
use log::{debug, warn};
use std::thread;
use std::time::Duration;

pub const UI_HOST: &str = "localhost";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn ui_url(host: &str, http_port: u16, ws_port: u16) -> String {
    format!("http://{host}:{http_port}?host={UI_HOST}&port={ws_port}&autoconnect=true")
}

pub trait UrlOpener {
    fn open(&self, url: &str) -> Result<(), LaunchError>;
}

pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<(), LaunchError> {
        open::that(url).map_err(|err| LaunchError::BrowserOpenFailure(err.to_string()))
    }
}

// Result is only logged.
pub fn probe_ready(http_port: u16) -> bool {
    let client = match reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            debug!("readiness probe client unavailable: {err}");
            return false;
        }
    };
    match client.get(format!("http://127.0.0.1:{http_port}/")).send() {
        Ok(response) => {
            debug!("readiness probe returned {}", response.status());
            true
        }
        Err(err) => {
            warn!("http server on port {http_port} did not answer: {err}");
            false
        }
    }
}

pub fn open_ui<O: UrlOpener>(
    opener: &O,
    url: &str,
    http_port: u16,
    delay: Duration,
    console: &Console,
) -> Result<(), LaunchError> {
    console.step("Opening browser");
    console.detail("url", url);
    thread::sleep(delay);
    probe_ready(http_port);

    match opener.open(url) {
        Ok(()) => {
            console.success("browser opened");
            Ok(())
        }
        Err(err) => {
            console.warn(format!("could not open a browser automatically: {err}"));
            console.warn(format!("open this URL manually: {url}"));
            Err(err)
        }
    }
}
