//! Local HTTP API.
//!
//! A small loopback-only server exposing the supervisor to the surrounding
//! web layer: session control, the cached current frame, movement history,
//! stored analyses, statistics and encryption status. Requests authenticate
//! with a bearer capability token generated at spawn time (optionally
//! written to a file for other local processes).

use anyhow::{anyhow, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::supervisor::{MonitoringSupervisor, StartOutcome, StopOutcome};

const MAX_REQUEST_BYTES: usize = 65_536;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8686".to_string(),
            token_path: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    supervisor: Arc<MonitoringSupervisor>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, supervisor: Arc<MonitoringSupervisor>) -> Self {
        Self { cfg, supervisor }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let mut token_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);
        let token_path = self.cfg.token_path.clone();
        let supervisor = self.supervisor;
        let expected_token = token.clone();
        let join = std::thread::Builder::new()
            .name("sentinel-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, supervisor, expected_token, shutdown_thread) {
                    log::error!("monitor api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            token,
            token_path,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    supervisor: Arc<MonitoringSupervisor>,
    expected_token: String,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &supervisor, &expected_token) {
                    log::warn!("monitor api request rejected: {}", err);
                }
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
    supervisor: &MonitoringSupervisor,
    expected_token: &str,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;

    if request.path == "/health" {
        write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
        return Ok(());
    }

    if request.has_query_token() {
        write_json_response(
            &mut stream,
            400,
            r#"{"error":"token_query_param_not_allowed"}"#,
        )?;
        return Ok(());
    }
    let token = match request.bearer_token() {
        Some(token) => token,
        None => {
            write_json_response(&mut stream, 401, r#"{"error":"missing_token"}"#)?;
            return Ok(());
        }
    };
    if token != expected_token {
        write_json_response(&mut stream, 401, r#"{"error":"invalid_token"}"#)?;
        return Err(anyhow!("capability token invalid"));
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/monitor/start") => {
            let body: serde_json::Value = request.json_body().unwrap_or(serde_json::json!({}));
            let camera_index = body
                .get("camera_index")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            let enable_audio = body
                .get("enable_audio")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            let payload = match supervisor.start_monitoring(camera_index, enable_audio) {
                StartOutcome::Started {
                    camera,
                    audio_enabled,
                } => serde_json::json!({
                    "success": true,
                    "camera_info": camera,
                    "audio_enabled": audio_enabled,
                }),
                StartOutcome::AlreadyMonitoring => serde_json::json!({
                    "success": false,
                    "error": "monitoring already active",
                }),
                StartOutcome::CameraUnavailable {
                    error,
                    troubleshooting,
                } => serde_json::json!({
                    "success": false,
                    "error": error,
                    "troubleshooting": troubleshooting,
                }),
                StartOutcome::Error { reason } => serde_json::json!({
                    "success": false,
                    "error": reason,
                }),
            };
            write_json_response(&mut stream, 200, &payload.to_string())?;
        }
        ("POST", "/monitor/stop") => {
            let payload = match supervisor.stop_monitoring() {
                StopOutcome::Stopped {
                    stats,
                    forced_release,
                } => serde_json::json!({
                    "success": true,
                    "forced_release": forced_release,
                    "stats": stats,
                }),
                StopOutcome::NotMonitoring => serde_json::json!({
                    "success": false,
                    "error": "monitoring not active",
                }),
            };
            write_json_response(&mut stream, 200, &payload.to_string())?;
        }
        ("GET", "/frame") => {
            let encrypted = request.query_flag("encrypted").unwrap_or(true);
            let annotated = request.query_flag("annotated").unwrap_or(true);
            match supervisor.current_frame(encrypted, annotated) {
                Some(frame) => {
                    let payload = serde_json::to_vec(&frame)?;
                    write_response(&mut stream, 200, "application/json", &payload)?;
                }
                None => {
                    write_json_response(&mut stream, 404, r#"{"error":"no_frame_available"}"#)?;
                }
            }
        }
        ("GET", "/movement/history") => {
            let limit = request.query_usize("limit").unwrap_or(50);
            let payload = serde_json::to_vec(&supervisor.movement_history(limit))?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", "/movement/analysis") => {
            let limit = request.query_usize("limit").unwrap_or(10);
            let decrypt = request.query_flag("decrypt").unwrap_or(true);
            let payload = serde_json::to_vec(&supervisor.movement_analysis(limit, decrypt))?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", "/cameras") => {
            let devices = crate::capture::CameraSource::list_devices(10);
            let payload = serde_json::to_vec(&devices)?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", "/statistics") => {
            let payload = serde_json::to_vec(&supervisor.statistics())?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", "/privacy/status") => {
            let payload = serde_json::to_vec(&supervisor.encryption_status())?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("POST", "/analyze") => match supervisor.analyze_now() {
            Ok(analysis) => {
                let payload = serde_json::to_vec(&analysis)?;
                write_response(&mut stream, 200, "application/json", &payload)?;
            }
            Err(err) => {
                let payload =
                    serde_json::json!({"success": false, "error": err.to_string()});
                write_json_response(&mut stream, 200, &payload.to_string())?;
            }
        },
        (_, "/monitor/start") | (_, "/monitor/stop") | (_, "/analyze") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        }
        ("GET", _) => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
        }
        _ => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        }
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let mut header_end = None;
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            header_end = Some(pos + 4);
            break;
        }
    }
    let header_end = header_end.ok_or_else(|| anyhow!("incomplete request"))?;

    let header_text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    // Read the remainder of the body when Content-Length announces one.
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
        if header_end + body.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request body too large"));
        }
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
        body,
    })
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
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
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
    headers: HashMap<String, String>,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn has_query_token(&self) -> bool {
        self.query_param("token").is_some()
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            } else if pair == name {
                return Some(String::new());
            }
        }
        None
    }

    fn query_flag(&self, name: &str) -> Option<bool> {
        let value = self.query_param(name)?;
        match value.as_str() {
            "" | "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }
    }

    fn query_usize(&self, name: &str) -> Option<usize> {
        self.query_param(name)?.parse().ok()
    }

    fn json_body(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
