//! HTTP transport to unit controllers.
//!
//! A [`Transport`] performs exactly one GET and never fails: anything that
//! prevents an HTTP exchange is folded into a [`PollOutcome`] whose body is a
//! short diagnostic.
//!
//! Controllers ship with self-signed certificates issued for whatever
//! hostname the installer picked, so the client built by [`build_client`]
//! accepts any certificate for any host.

use std::time::Duration;

use async_trait::async_trait;
use coldwatch_types::PollOutcome;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::error::{Error, Result};
use crate::util::{error_chain, truncate_with_ellipsis};

/// Header carrying the unit's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Default bound on a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Diagnostic for name resolution failures.
pub const DIAG_DNS: &str = "DNS resolution failed";
/// Diagnostic for connect or read timeouts.
pub const DIAG_TIMEOUT: &str = "Connection timed out";
/// Diagnostic for refused connections.
pub const DIAG_REFUSED: &str = "Connection refused";

/// Longest raw failure description kept in a diagnostic.
const MAX_DIAGNOSTIC_CHARS: usize = 200;

const DNS_PATTERNS: &[&str] = &[
    "unable to resolve host",
    "unknownhost",
    "cannot resolve",
    "nodename nor servname provided",
    "failed to lookup address",
    "name or service not known",
    "no such host",
    "dns error",
];

/// One-shot GET against a unit's API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `base_url + path`, sending `api_key` as `X-API-Key` when present.
    async fn get(&self, base_url: &str, path: &str, api_key: Option<&str>) -> PollOutcome;
}

/// Client builder preconfigured for unit controllers.
pub fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .danger_accept_invalid_certs(true)
        .user_agent(concat!("coldwatch/", env!("CARGO_PKG_VERSION")))
}

/// Build the HTTP client shared by probes and control requests.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    client_builder(timeout).build().map_err(Error::HttpClient)
}

/// Map a lower-cased failure description onto the diagnostic taxonomy.
pub fn classify_failure(description: &str) -> String {
    let lower = description.to_lowercase();
    if DNS_PATTERNS.iter().any(|p| lower.contains(p)) {
        return DIAG_DNS.to_string();
    }
    if lower.contains("timed out") {
        return DIAG_TIMEOUT.to_string();
    }
    if lower.contains("refused") || lower.contains("failed to connect") {
        return DIAG_REFUSED.to_string();
    }
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return "network error".to_string();
    }
    truncate_with_ellipsis(trimmed, MAX_DIAGNOSTIC_CHARS)
}

/// Diagnostic for a reqwest failure.
pub fn describe_failure(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return DIAG_TIMEOUT.to_string();
    }
    classify_failure(&error_chain(err))
}

/// [`Transport`] backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with its own client bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    /// Create a transport around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, base_url: &str, path: &str, api_key: Option<&str>) -> PollOutcome {
        let url = format!("{}{}", base_url, path);
        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if let Some(key) = api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let diagnostic = describe_failure(&e);
                debug!("GET {} failed: {} ({})", url, diagnostic, e);
                return PollOutcome::transport_failure(path, diagnostic);
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => {
                debug!("GET {} -> {}", url, status);
                PollOutcome::from_response(path, status, body)
            }
            Err(e) => {
                let diagnostic = describe_failure(&e);
                debug!("GET {} body read failed: {}", url, diagnostic);
                PollOutcome::transport_failure(path, diagnostic)
            }
        }
    }
}

/// Minimal in-process HTTP/1.1 server for transport and client tests.
#[cfg(test)]
pub(crate) mod stub_server {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// A request as seen by the stub.
    #[derive(Debug, Clone)]
    pub(crate) struct RecordedRequest {
        pub method: String,
        pub path: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl RecordedRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            let name = name.to_ascii_lowercase();
            self.headers
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        }
    }

    /// What the stub does with a request.
    pub(crate) enum StubReply {
        Respond { status: u16, body: String },
        Hang,
    }

    impl StubReply {
        pub fn json(status: u16, body: &str) -> Self {
            StubReply::Respond {
                status,
                body: body.to_string(),
            }
        }
    }

    type Router = dyn Fn(&RecordedRequest) -> StubReply + Send + Sync;

    pub(crate) struct StubServer {
        pub addr: SocketAddr,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
        handle: JoinHandle<()>,
    }

    impl StubServer {
        pub async fn start<F>(router: F) -> Self
        where
            F: Fn(&RecordedRequest) -> StubReply + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let router: Arc<Router> = Arc::new(router);

            let recorded = Arc::clone(&requests);
            let handle = tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let router = Arc::clone(&router);
                    let recorded = Arc::clone(&recorded);
                    tokio::spawn(async move {
                        serve(stream, router, recorded).await;
                    });
                }
            });

            Self {
                addr,
                requests,
                handle,
            }
        }

        pub fn base_url(&self) -> String {
            format!("http://{}", self.addr)
        }

        pub fn port(&self) -> u16 {
            self.addr.port()
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Drop for StubServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    async fn serve(
        mut stream: TcpStream,
        router: Arc<Router>,
        recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    ) {
        let Some(request) = read_request(&mut stream).await else {
            return;
        };
        recorded.lock().unwrap().push(request.clone());

        match router(&request) {
            StubReply::Respond { status, body } => {
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            StubReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buf[header_end + 4..].to_vec();
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }

        Some(RecordedRequest {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(&body).to_string(),
        })
    }
}
