//! Forwarding proxy from `/mcp` to the upstream MCP server.
//!
//! # Request Flow
//!
//! ```text
//! Request<Body> ──► strip Authorization + hop-by-hop headers
//!                        │
//!                        ▼
//!        http://{upstream}{path_and_query}   (Host left untouched)
//!                        │
//!                        ▼
//!   Response<Incoming> ──► TimeoutBody ──► Response<Body>
//! ```
//!
//! Bodies stream in both directions; nothing is buffered. The response is
//! relayed with its status, headers and body as the upstream sent them.

use std::time::Duration;

use axum::body::Body;
use http::{HeaderMap, Request, Response, Uri, Version, header};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::timeout::{StreamTimeouts, TimeoutBody};

/// Timeouts applied to upstream exchanges.
#[derive(Debug, Clone, Copy)]
pub struct ProxyConfig {
    /// Time allowed for the upstream to send response headers.
    pub response_timeout: Duration,
    /// Deadlines on the streamed response body.
    pub stream: StreamTimeouts,
}

impl ProxyConfig {
    /// Derive the proxy settings from the gateway configuration.
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            response_timeout: config.upstream_timeout,
            stream: StreamTimeouts::new(
                config.upstream_idle_timeout,
                config.upstream_stream_timeout,
            ),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            stream: StreamTimeouts::new(Duration::from_secs(300), Duration::from_secs(3600)),
        }
    }
}

/// Relays admitted requests to a fixed upstream authority.
#[derive(Clone)]
pub struct ForwardingProxy {
    client: Client<HttpConnector, Body>,
    upstream_authority: String,
    config: ProxyConfig,
}

impl ForwardingProxy {
    /// Create a proxy targeting `http://{upstream_authority}`.
    pub fn new(upstream_authority: impl Into<String>, config: ProxyConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self {
            client,
            upstream_authority: upstream_authority.into(),
            config,
        }
    }

    /// `host:port` requests are forwarded to.
    pub fn upstream_authority(&self) -> &str {
        &self.upstream_authority
    }

    /// Forward one request and return the upstream response, streamed.
    ///
    /// # Errors
    ///
    /// - `GatewayError::InvalidUri` if the target URI cannot be built
    /// - `GatewayError::UpstreamUnavailable` if the upstream cannot be reached
    /// - `GatewayError::UpstreamTimeout` if response headers do not arrive in time
    pub async fn forward(&self, req: Request<Body>) -> GatewayResult<Response<Body>> {
        let target = self.target_uri(req.uri())?;

        let (mut parts, body) = req.into_parts();
        debug!(method = %parts.method, target = %target, "Forwarding request upstream");

        strip_request_headers(&mut parts.headers);
        parts.uri = target;
        // The upstream leg is always HTTP/1.1, whatever the client spoke.
        parts.version = Version::HTTP_11;
        let upstream_req = Request::from_parts(parts, body);

        let upstream_res =
            match tokio::time::timeout(self.config.response_timeout, self.client.request(upstream_req))
                .await
            {
                Ok(result) => result.map_err(map_client_error)?,
                Err(_) => {
                    warn!(
                        upstream = %self.upstream_authority,
                        timeout_ms = self.config.response_timeout.as_millis(),
                        "Upstream response timed out"
                    );
                    return Err(GatewayError::UpstreamTimeout(format!(
                        "no response headers within {:?}",
                        self.config.response_timeout
                    )));
                }
            };

        let (parts, body) = upstream_res.into_parts();
        let body = Body::new(TimeoutBody::new(body, self.config.stream));
        Ok(Response::from_parts(parts, body))
    }

    /// Wait until the upstream accepts TCP connections, or `timeout` passes.
    ///
    /// Returns `true` once reachable. A `false` return is not fatal; requests
    /// answer 502 until the upstream comes up.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match TcpStream::connect(self.upstream_authority.as_str()).await {
                Ok(_) => {
                    info!(upstream = %self.upstream_authority, attempts, "Upstream is accepting connections");
                    return true;
                }
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!(
                            upstream = %self.upstream_authority,
                            attempts,
                            error = %e,
                            "Upstream not reachable at startup, continuing"
                        );
                        return false;
                    }
                    debug!(upstream = %self.upstream_authority, error = %e, "Upstream not ready yet");
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    fn target_uri(&self, incoming: &Uri) -> GatewayResult<Uri> {
        let path = incoming
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", self.upstream_authority, path)
            .parse()
            .map_err(|e| GatewayError::InvalidUri(format!("failed to build upstream URI: {e}")))
    }
}

/// Remove headers that must not reach the upstream.
///
/// `Authorization` is consumed by the gateway. `Host` and origin headers are
/// left as the client sent them.
fn strip_request_headers(headers: &mut HeaderMap) {
    headers.remove(header::AUTHORIZATION);
    let hop_by_hop: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(name);
    }
}

/// Check if a header is a hop-by-hop header that shouldn't be forwarded.
///
/// `connection`, `upgrade` and `transfer-encoding` are left to hyper.
#[cfg(feature = "fuzzing")]
pub fn is_hop_by_hop_header(name: &str) -> bool {
    is_hop_by_hop_header_impl(name)
}

#[cfg(not(feature = "fuzzing"))]
fn is_hop_by_hop_header(name: &str) -> bool {
    is_hop_by_hop_header_impl(name)
}

fn is_hop_by_hop_header_impl(name: &str) -> bool {
    ["keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailers"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Map hyper_util client errors to gateway errors.
///
/// - Timeout -> `GatewayError::UpstreamTimeout` (504)
/// - Everything else -> `GatewayError::UpstreamUnavailable` (502)
fn map_client_error(e: hyper_util::client::legacy::Error) -> GatewayError {
    let error_msg = format!("{e:?}").to_lowercase();
    let hyper_timeout = std::error::Error::source(&e)
        .and_then(|source| source.downcast_ref::<hyper::Error>())
        .is_some_and(hyper::Error::is_timeout);

    if hyper_timeout || error_msg.contains("timed out") || error_msg.contains("timeout") {
        warn!(error = %e, "Upstream timeout");
        return GatewayError::UpstreamTimeout(e.to_string());
    }

    if e.is_connect() {
        warn!(error = %e, "Upstream connection failed");
        return GatewayError::UpstreamUnavailable(format!("failed to connect to upstream: {e}"));
    }

    warn!(error = %e, "Upstream error");
    GatewayError::UpstreamUnavailable(format!("upstream error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Request as AxumRequest;
    use http::{HeaderValue, Method, StatusCode};
    use http_body_util::BodyExt;
    use std::net::SocketAddr;

    /// Echo upstream: replies with the request body and reflects the method,
    /// path, query and selected headers back as response headers.
    async fn start_echo_upstream() -> SocketAddr {
        let app = Router::new().fallback(|req: AxumRequest| async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await.unwrap().to_bytes();
            let mut resp = Response::new(Body::from(bytes));
            *resp.status_mut() = StatusCode::CREATED;
            let h = resp.headers_mut();
            h.insert("x-echo-method", HeaderValue::from_str(parts.method.as_str()).unwrap());
            h.insert(
                "x-echo-uri",
                HeaderValue::from_str(&parts.uri.to_string()).unwrap(),
            );
            h.insert(
                "x-echo-auth",
                HeaderValue::from_static(if parts.headers.contains_key(header::AUTHORIZATION) {
                    "present"
                } else {
                    "absent"
                }),
            );
            if let Some(host) = parts.headers.get(header::HOST) {
                h.insert("x-echo-host", host.clone());
            }
            resp
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_target_uri_keeps_path_and_query() {
        let proxy = ForwardingProxy::new("127.0.0.1:18080", ProxyConfig::default());
        let uri: Uri = "/mcp/sse?session=abc".parse().unwrap();
        assert_eq!(
            proxy.target_uri(&uri).unwrap().to_string(),
            "http://127.0.0.1:18080/mcp/sse?session=abc"
        );

        let bare: Uri = "/mcp".parse().unwrap();
        assert_eq!(
            proxy.target_uri(&bare).unwrap().to_string(),
            "http://127.0.0.1:18080/mcp"
        );
    }

    #[test]
    fn test_target_uri_rejects_bad_authority() {
        let proxy = ForwardingProxy::new("bad host:80", ProxyConfig::default());
        let uri: Uri = "/mcp".parse().unwrap();
        assert!(matches!(
            proxy.target_uri(&uri),
            Err(GatewayError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_upstream_authority_is_server_fault() {
        use axum::response::IntoResponse;

        let proxy = ForwardingProxy::new("bad host:80", ProxyConfig::default());
        let req = Request::builder()
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();

        let resp = proxy.forward(req).await.unwrap_err().into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("keep-alive"));
        assert!(is_hop_by_hop_header("Proxy-Authorization"));
        assert!(is_hop_by_hop_header("TE"));

        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("transfer-encoding"));
        assert!(!is_hop_by_hop_header("mcp-session-id"));
    }

    #[test]
    fn test_strip_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        headers.insert(header::HOST, HeaderValue::from_static("gateway.example.com"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("mcp-session-id", HeaderValue::from_static("abc"));

        strip_request_headers(&mut headers);

        assert!(!headers.contains_key(header::AUTHORIZATION));
        assert!(!headers.contains_key("keep-alive"));
        assert_eq!(headers[header::HOST], "gateway.example.com");
        assert_eq!(headers["mcp-session-id"], "abc");
    }

    #[tokio::test]
    async fn test_forward_round_trip() {
        let addr = start_echo_upstream().await;
        let proxy = ForwardingProxy::new(addr.to_string(), ProxyConfig::default());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/mcp?x=1")
            .header(header::HOST, "gateway.example.com")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"ping":1}"#))
            .unwrap();

        let resp = proxy.forward(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["x-echo-method"], "POST");
        assert_eq!(resp.headers()["x-echo-uri"], "/mcp?x=1");
        assert_eq!(resp.headers()["x-echo-auth"], "absent");
        assert_eq!(resp.headers()["x-echo-host"], "gateway.example.com");

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"ping":1}"#);
    }

    #[tokio::test]
    async fn test_forward_unreachable_upstream_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = ForwardingProxy::new(addr.to_string(), ProxyConfig::default());
        let req = Request::builder()
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();

        let err = proxy.forward(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_forward_slow_upstream_is_gateway_timeout() {
        let app = Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let proxy = ForwardingProxy::new(
            addr.to_string(),
            ProxyConfig {
                response_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let req = Request::builder()
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();

        let err = proxy.forward(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamTimeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_wait_until_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let proxy = ForwardingProxy::new(addr.to_string(), ProxyConfig::default());
        assert!(proxy.wait_until_ready(Duration::from_secs(1)).await);

        drop(listener);
        assert!(!proxy.wait_until_ready(Duration::from_millis(300)).await);
    }
}
