//! Liveness probes
//!
//! Contract: success = TCP accept, or an HTTP 2xx status line, within the
//! probe timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use super::errors::{ProbeError, ProbeResult};

/// Largest status line we are willing to buffer.
const MAX_STATUS_LINE: usize = 512;

/// A region-scoped liveness check.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Probe `endpoint` once; returns the observed latency on success.
    async fn probe(&self, endpoint: &str) -> ProbeResult<Duration>;
}

/// Probe transport, as configured per region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeKind {
    /// Plain TCP accept
    Tcp,
    /// `GET <path>` expecting 2xx
    Http { path: String },
}

impl Default for ProbeKind {
    fn default() -> Self {
        ProbeKind::Tcp
    }
}

/// Build the probe for a configured kind.
pub fn build_probe(kind: &ProbeKind, probe_timeout: Duration) -> Arc<dyn LivenessProbe> {
    match kind {
        ProbeKind::Tcp => Arc::new(TcpProbe::new(probe_timeout)),
        ProbeKind::Http { path } => Arc::new(HttpProbe::new(path.clone(), probe_timeout)),
    }
}

/// TCP accept probe.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Create a TCP probe.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, endpoint: &str) -> ProbeResult<Duration> {
        let started = Instant::now();
        match timeout(self.timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(_stream)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(ProbeError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(timeout_error(endpoint, self.timeout)),
        }
    }
}

/// HTTP status probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
    timeout: Duration,
}

impl HttpProbe {
    /// Create an HTTP probe for `path`.
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { path, timeout }
    }

    async fn exchange(&self, endpoint: &str) -> ProbeResult<u16> {
        let mut stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| ProbeError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let host = endpoint.rsplit_once(':').map(|(h, _)| h).unwrap_or(endpoint);
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: drorch-probe\r\nConnection: close\r\n\r\n",
            self.path, host
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ProbeError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let mut buffer = Vec::with_capacity(128);
        let mut chunk = [0u8; 128];
        while !buffer.contains(&b'\n') && buffer.len() < MAX_STATUS_LINE {
            let read = stream.read(&mut chunk).await.map_err(|e| ProbeError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }

        parse_status_line(&buffer).ok_or_else(|| ProbeError::Protocol {
            endpoint: endpoint.to_string(),
            reason: "missing or invalid status line".into(),
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> ProbeResult<Duration> {
        let started = Instant::now();
        let status = timeout(self.timeout, self.exchange(endpoint))
            .await
            .map_err(|_| timeout_error(endpoint, self.timeout))??;

        if (200..300).contains(&status) {
            Ok(started.elapsed())
        } else {
            Err(ProbeError::BadStatus {
                endpoint: endpoint.to_string(),
                status,
            })
        }
    }
}

fn timeout_error(endpoint: &str, after: Duration) -> ProbeError {
    ProbeError::Timeout {
        endpoint: endpoint.to_string(),
        timeout_ms: after.as_millis() as u64,
    }
}

/// Extract the status code from `HTTP/1.x NNN ...`.
fn parse_status_line(bytes: &[u8]) -> Option<u16> {
    let line_end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let line = std::str::from_utf8(&bytes[..line_end]).ok()?;
    let mut parts = line.trim_end().split_whitespace();

    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 512];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(parse_status_line(b"HTTP/1.0 503 Service Unavailable\r\n"), Some(503));
        assert_eq!(parse_status_line(b"HTTP/1.1 204"), Some(204));
        assert_eq!(parse_status_line(b"SSH-2.0-OpenSSH\r\n"), None);
        assert_eq!(parse_status_line(b"HTTP/1.1 20 OK\r\n"), None);
        assert_eq!(parse_status_line(b""), None);
    }

    #[test]
    fn test_http_probe_normalises_path() {
        let probe = HttpProbe::new("healthz", Duration::from_secs(1));
        assert_eq!(probe.path, "/healthz");
    }

    #[test]
    fn test_probe_kind_config_shape() {
        let kind: ProbeKind = serde_json::from_str(r#"{"kind":"http","path":"/health"}"#).unwrap();
        assert_eq!(kind, ProbeKind::Http { path: "/health".into() });

        let kind: ProbeKind = serde_json::from_str(r#"{"kind":"tcp"}"#).unwrap();
        assert_eq!(kind, ProbeKind::Tcp);
    }

    #[tokio::test]
    async fn test_tcp_probe_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let probe = TcpProbe::new(Duration::from_secs(2));
        assert!(probe.probe(&addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let probe = TcpProbe::new(Duration::from_secs(2));
        let err = probe.probe(&addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_http_probe_2xx_is_healthy() {
        let addr = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        let probe = HttpProbe::new("/health", Duration::from_secs(2));
        assert!(probe.probe(&addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_5xx_is_unhealthy() {
        let addr = serve_once("HTTP/1.1 503 Service Unavailable\r\n\r\n").await;
        let probe = HttpProbe::new("/health", Duration::from_secs(2));
        let err = probe.probe(&addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::BadStatus { status: 503, .. }));
    }
}
