use crate::error::LaunchError;
use log::{debug, info, warn};
use mime_guess::MimeGuess;
use std::fs;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Method, Request, Response, StatusCode};

const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];
#[cfg(unix)]
const ADDR_IN_USE_CODE: Option<i32> = Some(libc::EADDRINUSE);
// WSAEADDRINUSE
#[cfg(windows)]
const ADDR_IN_USE_CODE: Option<i32> = Some(10048);
#[cfg(not(any(unix, windows)))]
const ADDR_IN_USE_CODE: Option<i32> = None;

pub fn classify_bind_error(port: u16, err: io::Error) -> LaunchError {
    let in_use = err.kind() == io::ErrorKind::AddrInUse
        || (err.raw_os_error().is_some() && err.raw_os_error() == ADDR_IN_USE_CODE);
    if in_use {
        LaunchError::PortInUse { port }
    } else {
        LaunchError::BindFailure { port, source: err }
    }
}

pub struct StaticServer {
    server: Arc<tiny_http::Server>,
    thread: Option<JoinHandle<()>>,
    addr: SocketAddr,
    root: PathBuf,
}

impl StaticServer {
    pub fn start(root: &Path, port: u16) -> Result<Self, LaunchError> {
        let root = fs::canonicalize(root).map_err(|err| {
            LaunchError::Config(format!("web directory {}: {err}", root.display()))
        })?;
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|err| classify_bind_error(port, err))?;
        let addr = listener.local_addr()?;
        let server = tiny_http::Server::from_listener(listener, None).map_err(|err| {
            LaunchError::BindFailure {
                port,
                source: io::Error::new(io::ErrorKind::Other, err.to_string()),
            }
        })?;
        let server = Arc::new(server);

        let worker = Arc::clone(&server);
        let serve_root = root.clone();
        let thread = thread::Builder::new()
            .name("rpcweb-http".to_string())
            .spawn(move || serve(&worker, &serve_root))?;

        info!("serving {} on {addr}", root.display());
        Ok(Self {
            server,
            thread: Some(thread),
            addr,
            root,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.server.unblock();
        if thread.join().is_err() {
            warn!("http server thread panicked");
        }
        debug!("http server on port {} stopped", self.port());
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(server: &tiny_http::Server, root: &Path) {
    for request in server.incoming_requests() {
        let reply = resolve_request(root, request.method(), request.url());
        debug!(
            "{} {} -> {}",
            request.method(),
            request.url(),
            reply.status()
        );
        if let Err(err) = respond(request, reply) {
            debug!("failed to write response: {err}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    File { path: PathBuf, content_type: String },
    Listing { html: String },
    Redirect { location: String },
    Status { code: u16, message: &'static str },
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::File { .. } | Reply::Listing { .. } => 200,
            Reply::Redirect { .. } => 301,
            Reply::Status { code, .. } => *code,
        }
    }

    fn not_found() -> Self {
        Reply::Status {
            code: 404,
            message: "File not found",
        }
    }

    fn forbidden() -> Self {
        Reply::Status {
            code: 403,
            message: "Forbidden",
        }
    }
}

// `root` must already be canonical.
pub fn resolve_request(root: &Path, method: &Method, url: &str) -> Reply {
    if !matches!(method, Method::Get | Method::Head) {
        return Reply::Status {
            code: 501,
            message: "Unsupported method",
        };
    }

    let raw_path = url.split(|c| c == '?' || c == '#').next().unwrap_or("/");
    let Ok(decoded) = urlencoding::decode(raw_path) else {
        return Reply::Status {
            code: 400,
            message: "Bad request path",
        };
    };
    let Some(joined) = safe_join(root, &decoded) else {
        return Reply::forbidden();
    };
    let Ok(resolved) = fs::canonicalize(&joined) else {
        return Reply::not_found();
    };
    if !resolved.starts_with(root) {
        return Reply::forbidden();
    }

    if resolved.is_dir() {
        if !raw_path.ends_with('/') {
            let rest = &url[raw_path.len()..];
            return Reply::Redirect {
                location: format!("{raw_path}/{rest}"),
            };
        }
        for index in INDEX_FILES {
            let candidate = resolved.join(index);
            if candidate.is_file() {
                return file_reply(candidate);
            }
        }
        return match render_listing(&resolved, &decoded) {
            Ok(html) => Reply::Listing { html },
            Err(_) => Reply::Status {
                code: 404,
                message: "No permission to list directory",
            },
        };
    }

    // A trailing slash only names directories.
    if resolved.is_file() && !raw_path.ends_with('/') {
        return file_reply(resolved);
    }
    Reply::not_found()
}

fn file_reply(path: PathBuf) -> Reply {
    let content_type = MimeGuess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Reply::File { path, content_type }
}

fn safe_join(root: &Path, decoded: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

pub fn render_listing(dir: &Path, display_path: &str) -> io::Result<String> {
    let mut entries: Vec<(String, bool)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.path().is_dir();
            (name, is_dir)
        })
        .collect();
    entries.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

    let title = format!("Directory listing for {}", html_escape(display_path));
    let mut html = String::new();
    html.push_str("<!DOCTYPE HTML>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{title}</title>\n</head>\n<body>\n"));
    html.push_str(&format!("<h1>{title}</h1>\n<hr>\n<ul>\n"));
    for (name, is_dir) in entries {
        let suffix = if is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<li><a href=\"{}{suffix}\">{}{suffix}</a></li>\n",
            urlencoding::encode(&name),
            html_escape(&name)
        ));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    Ok(html)
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn with_header<R: Read>(response: Response<R>, name: &str, value: &str) -> Response<R> {
    match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn respond(request: Request, reply: Reply) -> io::Result<()> {
    let response: Response<Box<dyn Read + Send>> = match reply {
        Reply::File { path, content_type } => match fs::File::open(&path) {
            Ok(file) => with_header(Response::from_file(file), "Content-Type", &content_type)
                .boxed(),
            Err(_) => text_response(404, "File not found"),
        },
        Reply::Listing { html } => with_header(
            Response::from_string(html),
            "Content-Type",
            "text/html; charset=utf-8",
        )
        .boxed(),
        Reply::Redirect { location } => with_header(
            Response::empty(StatusCode(301)),
            "Location",
            &location,
        )
        .boxed(),
        Reply::Status { code, message } => text_response(code, message),
    };
    request.respond(response)
}

fn text_response(code: u16, message: &str) -> Response<Box<dyn Read + Send>> {
    with_header(
        Response::from_string(format!("{code} {message}\n")).with_status_code(StatusCode(code)),
        "Content-Type",
        "text/plain; charset=utf-8",
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Duration;
    use tempfile::tempdir;

    fn web_root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join("app.js"), "console.log('hi');\n").unwrap();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("assets").join("style.css"), "body{}\n").unwrap();
        fs::create_dir_all(root.join("site")).unwrap();
        fs::write(root.join("site").join("index.html"), "<h1>ui</h1>\n").unwrap();
        (dir, root)
    }

    #[test]
    fn files_are_served_with_guessed_type() {
        let (_dir, root) = web_root();
        let reply = resolve_request(&root, &Method::Get, "/assets/style.css?x=1");
        assert_eq!(
            reply,
            Reply::File {
                path: root.join("assets").join("style.css"),
                content_type: "text/css".to_string(),
            }
        );
        let reply = resolve_request(&root, &Method::Head, "/app.js");
        assert_eq!(reply.status(), 200);
    }

    #[test]
    fn directory_with_index_serves_it() {
        let (_dir, root) = web_root();
        match resolve_request(&root, &Method::Get, "/site/?host=localhost&port=12346") {
            Reply::File { path, content_type } => {
                assert_eq!(path, root.join("site").join("index.html"));
                assert_eq!(content_type, "text/html");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn directory_without_slash_redirects_keeping_query() {
        let (_dir, root) = web_root();
        assert_eq!(
            resolve_request(&root, &Method::Get, "/site?autoconnect=true"),
            Reply::Redirect {
                location: "/site/?autoconnect=true".to_string()
            }
        );
    }

    #[test]
    fn directory_without_index_is_listed() {
        let (_dir, root) = web_root();
        fs::write(root.join("a <b>.txt"), "x").unwrap();
        match resolve_request(&root, &Method::Get, "/") {
            Reply::Listing { html } => {
                assert!(html.contains("Directory listing for /"));
                assert!(html.contains("<a href=\"app.js\">app.js</a>"));
                assert!(html.contains("<a href=\"assets/\">assets/</a>"));
                assert!(html.contains("<a href=\"a%20%3Cb%3E.txt\">a &lt;b&gt;.txt</a>"));
                let app = html.find("app.js").unwrap();
                let assets = html.find("assets/").unwrap();
                assert!(app < assets);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn traversal_is_forbidden_and_missing_is_404() {
        let (_dir, root) = web_root();
        assert_eq!(
            resolve_request(&root, &Method::Get, "/../etc/passwd").status(),
            403
        );
        assert_eq!(
            resolve_request(&root, &Method::Get, "/%2e%2e/secret").status(),
            403
        );
        assert_eq!(resolve_request(&root, &Method::Get, "/nope.html").status(), 404);
    }

    #[test]
    fn file_with_trailing_slash_is_404() {
        let (_dir, root) = web_root();
        assert_eq!(resolve_request(&root, &Method::Get, "/app.js/").status(), 404);
        assert_eq!(
            resolve_request(&root, &Method::Get, "/assets/style.css/?v=2").status(),
            404
        );
        assert_eq!(resolve_request(&root, &Method::Get, "/app.js").status(), 200);
    }

    #[test]
    fn index_htm_is_the_fallback_index() {
        let (_dir, root) = web_root();
        fs::create_dir_all(root.join("legacy")).unwrap();
        fs::write(root.join("legacy").join("index.htm"), "<p>old</p>\n").unwrap();
        assert_eq!(
            resolve_request(&root, &Method::Get, "/legacy/"),
            Reply::File {
                path: root.join("legacy").join("index.htm"),
                content_type: "text/html".to_string(),
            }
        );
        fs::write(root.join("legacy").join("index.html"), "<p>new</p>\n").unwrap();
        match resolve_request(&root, &Method::Get, "/legacy/") {
            Reply::File { path, .. } => assert_eq!(path, root.join("legacy").join("index.html")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_forbidden() {
        let (_dir, root) = web_root();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();
        assert_eq!(
            resolve_request(&root, &Method::Get, "/escape/secret.txt").status(),
            403
        );
    }

    #[test]
    fn other_methods_are_unsupported() {
        let (_dir, root) = web_root();
        assert_eq!(resolve_request(&root, &Method::Post, "/").status(), 501);
    }

    #[test]
    fn address_in_use_is_classified() {
        let err = classify_bind_error(8080, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, LaunchError::PortInUse { port: 8080 }));
        let err = classify_bind_error(80, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, LaunchError::BindFailure { port: 80, .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn only_the_native_errno_counts_as_in_use() {
        let err = classify_bind_error(8080, io::Error::from_raw_os_error(libc::EADDRINUSE));
        assert!(matches!(err, LaunchError::PortInUse { .. }));
        // 48 is ENOCSI on linux.
        let err = classify_bind_error(8080, io::Error::from_raw_os_error(48));
        assert!(matches!(err, LaunchError::BindFailure { .. }));
        let err = classify_bind_error(8080, io::Error::from_raw_os_error(10048));
        assert!(matches!(err, LaunchError::BindFailure { .. }));
    }

    #[test]
    fn bound_port_reports_port_in_use() {
        let (_dir, root) = web_root();
        let holder = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = holder.local_addr().unwrap().port();
        match StaticServer::start(&root, port) {
            Err(LaunchError::PortInUse { port: reported }) => assert_eq!(reported, port),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("bind should have failed"),
        }
    }

    fn raw_request(port: u16, request: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn head_over_http_sends_headers_without_body() {
        let (_dir, root) = web_root();
        fs::create_dir_all(root.join("legacy")).unwrap();
        fs::write(root.join("legacy").join("index.htm"), "<p>old</p>\n").unwrap();
        let server = StaticServer::start(&root, 0).expect("start");

        let response = raw_request(
            server.port(),
            "HEAD /app.js HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        let (_, body) = response.split_once("\r\n\r\n").expect("header terminator");
        assert!(body.is_empty(), "HEAD returned a body: {body:?}");

        let response = raw_request(
            server.port(),
            "GET /legacy/ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("text/html"));
        assert!(response.ends_with("<p>old</p>\n"));
    }

    #[test]
    fn serves_over_http_and_frees_port_on_stop() {
        let (_dir, root) = web_root();
        let mut server = StaticServer::start(&root, 0).expect("start");
        let port = server.port();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .write_all(b"GET /app.js HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("console.log('hi');"));

        server.stop();
        server.stop();
        drop(server);

        let mut rebound = false;
        for _ in 0..50 {
            if TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok() {
                rebound = true;
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        assert!(rebound, "port {port} was not released");
    }
}
