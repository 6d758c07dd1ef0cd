//! HTTP(S) transport.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use bundlesync_common::{Error, Result};

use crate::transport::Transport;

/// User agent sent with every request.
const USER_AGENT: &str = concat!("bundlesync/", env!("CARGO_PKG_VERSION"));

/// HTTP transport backed by reqwest.
///
/// Locations are absolute URLs, or paths relative to an optional base URL.
pub struct HttpTransport {
    http: Client,
    base: Option<Url>,
}

impl HttpTransport {
    /// Create a new HTTP transport with a default client.
    ///
    /// # Errors
    /// - The TLS backend or client could not be initialised
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(http))
    }

    /// Create a transport around an existing client.
    pub fn with_client(http: Client) -> Self {
        Self { http, base: None }
    }

    /// Resolve relative locations against `base`.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    fn to_url(&self, location: &str) -> Result<Url> {
        match Url::parse(location) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base {
                Some(base) => base
                    .join(location)
                    .map_err(|e| Error::InvalidInput(format!("Invalid location {}: {}", location, e))),
                None => Err(Error::InvalidInput(format!(
                    "Relative location without base URL: {}",
                    location
                ))),
            },
            Err(e) => Err(Error::InvalidInput(format!(
                "Invalid location {}: {}",
                location, e
            ))),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let url = self.to_url(location)?;
        debug!("GET {}", url);

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{} returned 404", url)));
        }
        if !status.is_success() {
            return Err(Error::Network(format!("{} returned {}", url, status)));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned response and return the server's base URL.
    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/", addr)
    }

    /// Serve one `200 OK` and report the request line the client sent.
    async fn serve_recording() -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]);
            let _ = tx.send(request.lines().next().unwrap_or_default().to_string());
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
            let _ = socket.shutdown().await;
        });
        (format!("http://{}/", addr), rx)
    }

    fn transport() -> HttpTransport {
        HttpTransport::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let base = serve_once("200 OK", b"hello").await;
        let data = transport().fetch(&format!("{}a.js", base)).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let base = serve_once("404 Not Found", b"").await;
        let err = transport().fetch(&format!("{}a.js", base)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let base = serve_once("503 Service Unavailable", b"busy").await;
        let err = transport().fetch(&format!("{}a.js", base)).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_relative_location_uses_base() {
        let base = serve_once("200 OK", b"rel").await;
        let transport = transport().with_base(Url::parse(&base).unwrap());
        assert_eq!(transport.fetch("lib/b.js").await.unwrap(), b"rel");
    }

    #[tokio::test]
    async fn test_reserved_characters_reach_the_server_escaped() {
        use bundlesync_common::ResourcePath;

        for (name, expected) in [("a#1.js", "/a%231.js"), ("q?x.js", "/q%3Fx.js")] {
            let (base, request_line) = serve_recording().await;
            let manifest = format!("{}manifest.json", base);
            let location =
                crate::transport::resolve_location(&manifest, &ResourcePath::parse(name).unwrap())
                    .unwrap();

            assert_eq!(transport().fetch(&location).await.unwrap(), b"ok");
            let line = request_line.await.unwrap();
            assert_eq!(line, format!("GET {} HTTP/1.1", expected));
        }
    }

    #[test]
    fn test_relative_location_without_base_fails() {
        let err = transport().to_url("a.js").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
