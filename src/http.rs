//! Minimal HTTP/1.1 plumbing shared by the stats API and the detect server.
//!
//! A dedicated thread accepts connections and hands each one to a short-lived
//! worker thread, so a slow or abandoned request never holds up the next one.
//! Every response closes the connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use thiserror::Error;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct RequestError {
    pub status: u16,
    pub message: String,
}

impl RequestError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::new(400, format!("read request: {}", err))
    }
}

pub(crate) struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::error(500, &format!("encode response: {}", err)),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::json_raw(status, serde_json::json!({ "error": message }).to_string())
    }

    fn json_raw(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into_bytes(),
        }
    }
}

/// Handle for a server thread started with [`spawn`].
#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Bind `addr` and serve requests with `handler` on a new thread.
pub(crate) fn spawn<H>(name: &str, addr: &str, handler: H) -> Result<ServerHandle>
where
    H: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    let configured_addr: SocketAddr = addr
        .parse()
        .map_err(|e| anyhow!("invalid {} address '{}': {}", name, addr, e))?;
    let listener = TcpListener::bind(configured_addr)?;
    let bound = listener.local_addr()?;
    if configured_addr.ip().is_loopback() && !bound.ip().is_loopback() {
        return Err(anyhow!(
            "{} configured for loopback address '{}', but bound to non-loopback address '{}'",
            name,
            configured_addr,
            bound
        ));
    }
    listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let label = name.to_string();
    let handler = Arc::new(handler);
    let join = std::thread::Builder::new()
        .name(label.clone())
        .spawn(move || {
            if let Err(err) = run(listener, handler, &shutdown_thread, &label) {
                log::error!("{} stopped: {}", label, err);
            }
        })?;
    log::info!("{} listening on {}", name, bound);
    Ok(ServerHandle {
        addr: bound,
        shutdown,
        join: Some(join),
    })
}

fn run<H>(
    listener: TcpListener,
    handler: Arc<H>,
    shutdown: &AtomicBool,
    label: &str,
) -> Result<()>
where
    H: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let handler = handler.clone();
                let worker_label = label.to_string();
                let spawned = std::thread::Builder::new()
                    .name(format!("{} conn", label))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, handler.as_ref()) {
                            log::warn!("{} request failed: {}", worker_label, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("{} dropped connection from {}: {}", label, peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection<H>(mut stream: TcpStream, handler: &H) -> Result<()>
where
    H: Fn(&HttpRequest) -> HttpResponse,
{
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return write_response(&mut stream, &HttpResponse::error(403, "forbidden"));
    }
    let response = match read_request(&mut stream) {
        Ok(request) => handler(&request),
        Err(err) => HttpResponse::error(err.status, &err.message),
    };
    write_response(&mut stream, &response)
}

pub(crate) fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest, RequestError>
where
    R: ReadTimeout,
{
    stream.set_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::new(400, "connection closed before headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::new(413, "request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::new(400, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::new(400, "missing method"))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::new(400, "missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::new(400, "invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::new(413, "request body too large"));
    }
    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::new(400, "request body truncated"));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

/// Streams that can bound how long a read blocks.
pub(crate) trait ReadTimeout {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl ReadTimeout for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

pub(crate) fn write_response<W: Write>(stream: &mut W, response: &HttpResponse) -> Result<()> {
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line(response.status),
        content_type = response.content_type,
        len = response.body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()?;
    Ok(())
}
