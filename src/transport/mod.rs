//! Request/response channel between `RemoteBackend` and an inference server.
//!
//! `Transport` is the seam: `HttpTransport` speaks JSON over HTTP with `ureq`,
//! tests substitute scripted transports.

pub mod wire;

use std::error::Error as _;
use std::io::{self, Read};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use url::Url;

pub use wire::{DetectRequest, DetectResponse, ErrorBody, ModelList, ServerHealth};

/// Responses larger than this are refused.
const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server returned status {code}: {body}")]
    Status { code: u16, body: String },
}

pub trait Transport: Send {
    /// Server base URL, for logs.
    fn endpoint(&self) -> &str;

    /// Check the server is reachable.
    fn probe(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Send one request body and wait for the response body.
    fn round_trip(&mut self, body: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn probe(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).probe(timeout)
    }

    fn round_trip(&mut self, body: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).round_trip(body, timeout)
    }
}

/// Validate and normalize a server base URL.
pub fn parse_endpoint(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid remote url '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "remote url must be http:// or https://, got {}://",
                other
            ))
        }
    }
    if url.host_str().is_none() {
        return Err(anyhow!("remote url '{}' has no host", raw));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// JSON-over-HTTP transport. `POST {base}/detect`, `GET {base}/health`.
pub struct HttpTransport {
    base: String,
    detect_url: String,
    health_url: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self> {
        let base = parse_endpoint(endpoint)?;
        Ok(Self {
            detect_url: format!("{}/detect", base),
            health_url: format!("{}/health", base),
            base,
            agent: ureq::AgentBuilder::new().build(),
        })
    }
}

impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.base
    }

    fn probe(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.agent
            .get(&self.health_url)
            .timeout(timeout)
            .call()
            .map_err(classify)?;
        Ok(())
    }

    fn round_trip(&mut self, body: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let response = self
            .agent
            .post(&self.detect_url)
            .timeout(timeout)
            .set("Content-Type", "application/json")
            .send_bytes(body)
            .map_err(classify)?;
        read_body(response).map_err(|err| {
            if is_timeout(&err) {
                TransportError::Timeout
            } else {
                TransportError::Connection(format!("read response: {}", err))
            }
        })
    }
}

fn read_body(response: ureq::Response) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn classify(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            TransportError::Status { code, body }
        }
        ureq::Error::Transport(transport) => {
            let timed_out = transport
                .source()
                .and_then(|source| source.downcast_ref::<io::Error>())
                .map(is_timeout)
                .unwrap_or(false)
                || transport.to_string().contains("timed out");
            if timed_out {
                TransportError::Timeout
            } else {
                TransportError::Connection(transport.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        assert_eq!(
            parse_endpoint("http://127.0.0.1:8000/").unwrap(),
            "http://127.0.0.1:8000"
        );
        let transport = HttpTransport::new("https://example.com/api/").unwrap();
        assert_eq!(transport.detect_url, "https://example.com/api/detect");
        assert_eq!(transport.health_url, "https://example.com/api/health");
    }

    #[test]
    fn endpoint_requires_http_scheme() {
        assert!(parse_endpoint("ws://127.0.0.1:8000").is_err());
        assert!(parse_endpoint("not a url").is_err());
    }

    #[test]
    fn unreachable_server_is_a_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut transport = HttpTransport::new(&format!("http://{}", addr)).unwrap();
        let err = transport
            .round_trip(b"{}", Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
