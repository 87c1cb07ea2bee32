use crate::config::LaunchSettings;
use crate::error::{LaunchError, INSTALL_HINT};
use crate::locator::{self, SearchEnv};
use crate::output::{print_json, JsonResult};
use dialoguer::console::style;
use serde::Serialize;
use serde_json::json;
use std::net::{Ipv4Addr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub id: String,
    pub ok: bool,
    pub severity: String,
    pub message: String,
    pub remediation: String,
    pub details: serde_json::Value,
}

fn doctor_check(
    id: &str,
    ok: bool,
    severity: &str,
    message: impl Into<String>,
    remediation: impl Into<String>,
    details: serde_json::Value,
) -> DoctorCheck {
    DoctorCheck {
        id: id.to_string(),
        ok,
        severity: severity.to_string(),
        message: message.into(),
        remediation: remediation.into(),
        details,
    }
}

fn port_check(id: &str, port: u16, flag: &str) -> DoctorCheck {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(_) => doctor_check(
            id,
            true,
            "error",
            format!("port {port} is free"),
            "",
            json!({"port": port}),
        ),
        Err(err) => doctor_check(
            id,
            false,
            "error",
            format!("port {port} cannot be bound: {err}"),
            format!("stop whatever holds port {port} or choose another with {flag}"),
            json!({"port": port}),
        ),
    }
}

fn rpc_target_check(host: &str, port: u16) -> DoctorCheck {
    let details = json!({"host": host, "port": port});
    let addrs: Vec<_> = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(err) => {
            return doctor_check(
                "rpc_target",
                false,
                "warning",
                format!("cannot resolve {host}: {err}"),
                "check --host",
                details,
            )
        }
    };
    let reachable = addrs
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, CONNECT_TIMEOUT).is_ok());
    doctor_check(
        "rpc_target",
        reachable,
        "warning",
        if reachable {
            format!("RPC server reachable at {host}:{port}")
        } else {
            format!("nothing accepting connections at {host}:{port}")
        },
        "start the RPC server or point --host/--rpc-port at it",
        details,
    )
}

pub fn collect_doctor_checks(settings: &LaunchSettings, search: &SearchEnv) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let located = match &settings.proxy_binary {
        Some(path) => locator::locate_explicit(path),
        None => locator::locate(search),
    };
    checks.push(match located {
        Ok(path) => doctor_check(
            "proxy_binary",
            true,
            "error",
            format!("websocat found at {}", path.display()),
            "",
            json!({"path": path}),
        ),
        Err(err) => doctor_check(
            "proxy_binary",
            false,
            "error",
            err.to_string(),
            INSTALL_HINT,
            json!({"path": settings.proxy_binary}),
        ),
    });

    let web_dir_ok = settings.web_dir.is_dir();
    checks.push(doctor_check(
        "web_dir",
        web_dir_ok,
        "error",
        if web_dir_ok {
            format!("web directory {} exists", settings.web_dir.display())
        } else {
            format!("web directory {} does not exist", settings.web_dir.display())
        },
        "pass --web-dir pointing at the debug UI files",
        json!({"path": settings.web_dir}),
    ));

    checks.push(port_check("http_port", settings.http_port, "--http-port"));
    checks.push(port_check("ws_port", settings.ws_port, "--ws-port"));
    checks.push(rpc_target_check(&settings.rpc_host, settings.rpc_port));
    checks
}

pub fn handle_doctor(
    settings: &LaunchSettings,
    search: &SearchEnv,
    json: bool,
) -> Result<bool, LaunchError> {
    let checks = collect_doctor_checks(settings, search);
    let ok = !checks
        .iter()
        .any(|check| !check.ok && check.severity == "error");
    let primary_error = checks
        .iter()
        .find(|check| !check.ok && check.severity == "error")
        .map(|check| check.message.clone());

    if json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks })),
            error: primary_error,
            error_code: if ok { None } else { Some("doctor_failed") },
            hint: None,
        };
        print_json(&payload)?;
        return Ok(ok);
    }

    for check in &checks {
        let state = if check.ok {
            style("ok").green()
        } else if check.severity == "error" {
            style("fail").red()
        } else {
            style("warn").yellow()
        };
        println!("[{}] {} ({}) - {}", state, check.id, check.severity, check.message);
        if !check.ok {
            println!("  remediation: {}", check.remediation);
        }
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use std::path::Path;
    use tempfile::tempdir;

    fn settings(web_dir: &Path, http_port: u16, ws_port: u16) -> LaunchSettings {
        LaunchSettings {
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: 1,
            ws_port,
            http_port,
            web_dir: web_dir.to_path_buf(),
            proxy_binary: Some(web_dir.join("no-such-websocat")),
            open_browser: false,
            timing: TimingConfig::default(),
        }
    }

    fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn find<'a>(checks: &'a [DoctorCheck], id: &str) -> &'a DoctorCheck {
        checks.iter().find(|check| check.id == id).expect("check present")
    }

    #[test]
    fn reports_missing_binary_and_busy_port() {
        let dir = tempdir().unwrap();
        let holder = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let busy = holder.local_addr().unwrap().port();
        let checks = collect_doctor_checks(
            &settings(dir.path(), busy, free_port()),
            &SearchEnv::current(),
        );

        let binary = find(&checks, "proxy_binary");
        assert!(!binary.ok);
        assert!(binary.remediation.contains("websocat"));
        assert!(find(&checks, "web_dir").ok);
        assert!(!find(&checks, "http_port").ok);
        assert!(find(&checks, "ws_port").ok);
        assert_eq!(find(&checks, "rpc_target").severity, "warning");
    }

    #[test]
    fn reachable_rpc_target_passes() {
        let rpc = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = rpc.local_addr().unwrap().port();
        let check = rpc_target_check("127.0.0.1", port);
        assert!(check.ok, "{}", check.message);
    }
}
