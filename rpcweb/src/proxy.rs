use crate::error::LaunchError;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STDERR_TAIL_LINES: usize = 200;
const STOP_POLL: Duration = Duration::from_millis(50);

pub fn proxy_args(rpc_host: &str, rpc_port: u16, ws_port: u16) -> Vec<String> {
    vec![
        "--text".to_string(),
        format!("ws-l:0.0.0.0:{ws_port}"),
        format!("tcp:{rpc_host}:{rpc_port}"),
    ]
}

pub fn render_command(binary: &Path, args: &[String]) -> String {
    let mut parts = vec![binary.display().to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    Killed,
    AlreadyExited,
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

#[derive(Debug)]
pub struct ProxyProcess {
    child: Child,
    binary: PathBuf,
    stderr_tail: StderrTail,
    drains: Vec<JoinHandle<()>>,
}

impl ProxyProcess {
    pub fn start(
        binary: &Path,
        rpc_host: &str,
        rpc_port: u16,
        ws_port: u16,
        grace: Duration,
    ) -> Result<Self, LaunchError> {
        let args = proxy_args(rpc_host, rpc_port, ws_port);
        info!("starting proxy: {}", render_command(binary, &args));

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                LaunchError::StartupFailure(format!(
                    "failed to execute {}: {err}",
                    binary.display()
                ))
            })?;

        let stderr_tail: StderrTail = Arc::new(Mutex::new(VecDeque::new()));
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(thread::spawn(move || drain_lines(stdout, "stdout", None)));
        }
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            drains.push(thread::spawn(move || {
                drain_lines(stderr, "stderr", Some(tail))
            }));
        }

        let mut process = Self {
            child,
            binary: binary.to_path_buf(),
            stderr_tail,
            drains,
        };

        thread::sleep(grace);
        if let Some(status) = process.child.try_wait()? {
            let stderr = process.collect_stderr();
            let message = if stderr.is_empty() {
                format!("{} exited immediately ({status})", binary.display())
            } else {
                stderr
            };
            return Err(LaunchError::StartupFailure(message));
        }

        debug!("proxy running with pid {}", process.pid());
        Ok(process)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn exit_status(&mut self) -> Result<Option<ExitStatus>, LaunchError> {
        Ok(self.child.try_wait()?)
    }

    pub fn stop(&mut self, timeout: Duration) -> Result<StopOutcome, LaunchError> {
        if self.child.try_wait()?.is_some() {
            return Ok(StopOutcome::AlreadyExited);
        }
        request_termination(&mut self.child)?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!("proxy exited after termination request ({status})");
                return Ok(StopOutcome::Graceful);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }

        warn!(
            "proxy (pid {}) ignored termination for {timeout:?}; killing",
            self.pid()
        );
        match self.child.kill() {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err.into()),
        }
        self.child.wait()?;
        Ok(StopOutcome::Killed)
    }

    // Only once the child has exited, or the joins block.
    fn collect_stderr(&mut self) -> String {
        for handle in self.drains.drain(..) {
            let _ = handle.join();
        }
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

impl Drop for ProxyProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("proxy (pid {}) still running on drop; killing", self.pid());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> Result<(), LaunchError> {
    let pid = child.id() as libc::pid_t;
    // SAFETY: kill(2) with a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err.into())
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> Result<(), LaunchError> {
    match child.kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn drain_lines<R: Read>(reader: R, stream: &'static str, tail: Option<StderrTail>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                debug!("proxy {stream}: {line}");
                if let Some(tail) = &tail {
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
            Err(err) => {
                trace!("proxy {stream} closed: {err}");
                break;
            }
        }
    }
}
