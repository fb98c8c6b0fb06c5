//! HTTP surface.
//!
//! A small blocking server on a std `TcpListener`, one thread per connection
//! since `/video_feed` responses stay open for as long as the client reads.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /` | HTML page embedding the feed |
//! | `GET /video_feed` | `multipart/x-mixed-replace; boundary=frame` |
//! | `GET /api/plates?limit=&q=` | latest plate rows, newest first |
//! | `GET /api/stats` | `{bar:[{d,c}], pie:[{label,c}]}` |
//! | `GET /snaps/<file>` | snap JPEG |
//! | `GET /health` | `{"status":"ok"}` |

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::MJPEG_BOUNDARY;
use crate::pipeline::Pipeline;
use crate::storage::{PlateStore, DEFAULT_LATEST_LIMIT};

const MAX_REQUEST_BYTES: usize = 8192;
/// Upper bound on `/api/plates?limit=`.
const MAX_LATEST_LIMIT: usize = 1000;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><title>Helmet Watch</title></head>
<body>
<h1>Helmet Watch</h1>
<img src="/video_feed" alt="live feed">
</body>
</html>
"#;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open feeds end at their next frame.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

type SharedStore = Arc<Mutex<Option<Box<dyn PlateStore>>>>;

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<Pipeline>,
    reports: SharedStore,
}

impl ApiServer {
    /// `reports` is a read connection to plate storage; without it the plate
    /// and stats routes answer with empty results.
    pub fn new(
        cfg: ApiConfig,
        pipeline: Arc<Pipeline>,
        reports: Option<Box<dyn PlateStore>>,
    ) -> Self {
        Self {
            cfg,
            pipeline,
            reports: Arc::new(Mutex::new(reports)),
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, self.pipeline, self.reports, shutdown_thread) {
                log::error!("api server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    reports: SharedStore,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let pipeline = pipeline.clone();
                let reports = reports.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &pipeline, &reports, &shutdown) {
                        log::warn!("api request failed: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    pipeline: &Arc<Pipeline>,
    reports: &SharedStore,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/video_feed" => stream_feed(&mut stream, pipeline, shutdown),
        "/api/plates" => {
            let limit = match request.query.get("limit") {
                Some(raw) => match raw.trim().parse::<usize>() {
                    Ok(limit) => limit.min(MAX_LATEST_LIMIT),
                    Err(_) => {
                        return write_json_response(&mut stream, 400, r#"{"error":"invalid_limit"}"#)
                    }
                },
                None => DEFAULT_LATEST_LIMIT,
            };
            let query = request.query.get("q").map(String::as_str);
            let rows = with_reports(reports, |store| store.latest(limit, query))?;
            let payload = serde_json::to_vec(&rows.unwrap_or_default())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        "/api/stats" => {
            let stats = with_reports(reports, |store| store.stats())?;
            let payload = serde_json::to_vec(&stats.unwrap_or_default())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        path => match path.strip_prefix("/snaps/") {
            Some(name) => serve_snap(&mut stream, pipeline.snaps_dir(), name),
            None => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        },
    }
}

fn with_reports<T>(
    reports: &SharedStore,
    f: impl FnOnce(&mut dyn PlateStore) -> Result<T>,
) -> Result<Option<T>> {
    let mut guard = reports
        .lock()
        .map_err(|_| anyhow!("report store lock poisoned"))?;
    match guard.as_mut() {
        Some(store) => f(store.as_mut()).map(Some),
        None => Ok(None),
    }
}

/// One frame stream per subscriber, until the client goes away, the source
/// ends or the server stops.
/// Shutdown is checked before each pull, so no frame is processed for a feed
/// that is already stopping.
fn stream_feed<W: Write>(out: &mut W, pipeline: &Arc<Pipeline>, shutdown: &AtomicBool) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    out.write_all(header.as_bytes())?;
    let mut frames = pipeline.stream();
    while !shutdown.load(Ordering::SeqCst) {
        let Some(chunk) = frames.next() else {
            break;
        };
        if let Err(err) = out.write_all(&chunk) {
            log::debug!("video feed client left: {}", err);
            break;
        }
    }
    log::debug!("video feed closed after {} frames", frames.yielded());
    Ok(())
}

fn serve_snap(stream: &mut TcpStream, dir: &Path, name: &str) -> Result<()> {
    let Some(name) = sanitize_snap_name(name) else {
        return write_json_response(stream, 404, r#"{"error":"not_found"}"#);
    };
    match std::fs::read(dir.join(name)) {
        Ok(bytes) => write_response(stream, 200, "image/jpeg", &bytes),
        Err(_) => write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Accept a single plain file name; anything that could leave the snaps
/// directory is refused.
fn sanitize_snap_name(name: &str) -> Option<&str> {
    if name.is_empty() || name.contains('\\') {
        return None;
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
}
