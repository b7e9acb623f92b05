//! Mock upstream MCP server and mock health authority.
//!
//! Both bind an ephemeral loopback port and run until the test runtime
//! shuts down.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::stream;
use http_body_util::BodyExt;
use mcpgate::config::GatewayConfig;
use mcpgate::gateway::Gateway;
use mcpgate::rate_limiter::{FixedWindowRateLimiter, RateLimiterConfig};
use mcpgate::auth::CredentialVerifier;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Bearer credential used by every spawned gateway.
pub const TEST_TOKEN: &str = "test-gateway-token";

/// Credential the mock authority expects.
pub const TEST_BOT_TOKEN: &str = "xoxb-test";

/// Reserve a loopback port that nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ============================================================================
// Upstream
// ============================================================================

#[derive(Default)]
struct UpstreamState {
    requests: AtomicU32,
    release_stream: Notify,
}

/// Echo upstream standing in for the MCP server.
///
/// - `GET /mcp/stream` sends one event, waits for [`MockUpstream::release_stream`],
///   then sends a second and ends.
/// - Everything else answers `201` with the request body and reflects the
///   request line and selected headers as `x-echo-*` response headers.
pub struct MockUpstream {
    pub addr: SocketAddr,
    state: Arc<UpstreamState>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(UpstreamState::default());
        let app = Router::new()
            .route("/mcp/stream", get(stream_handler))
            .fallback(echo_handler)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    /// Requests that reached the upstream so far.
    pub fn request_count(&self) -> u32 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Let a pending `/mcp/stream` response finish.
    pub fn release_stream(&self) {
        self.state.release_stream.notify_one();
    }
}

async fn echo_handler(State(state): State<Arc<UpstreamState>>, req: Request) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let (parts, body) = req.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();

    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = StatusCode::CREATED;
    let h = resp.headers_mut();
    h.insert("x-echo-method", HeaderValue::from_str(parts.method.as_str()).unwrap());
    h.insert("x-echo-uri", HeaderValue::from_str(&parts.uri.to_string()).unwrap());
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
    if let Some(session) = parts.headers.get("mcp-session-id") {
        h.insert("mcp-session-id", session.clone());
    }
    resp
}

async fn stream_handler(State(state): State<Arc<UpstreamState>>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let events = stream::unfold(0u8, move |step| {
        let state = state.clone();
        async move {
            match step {
                0 => Some((Ok::<_, Infallible>("data: first\n\n"), 1)),
                1 => {
                    state.release_stream.notified().await;
                    Some((Ok("data: second\n\n"), 2))
                }
                _ => None,
            }
        }
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(events),
    )
        .into_response()
}

// ============================================================================
// Health authority
// ============================================================================

#[derive(Default)]
struct AuthorityState {
    healthy: AtomicBool,
    calls: AtomicU32,
}

/// Stand-in for Slack `auth.test`.
pub struct MockAuthority {
    pub addr: SocketAddr,
    state: Arc<AuthorityState>,
}

impl MockAuthority {
    pub async fn start() -> Self {
        let state = Arc::new(AuthorityState::default());
        state.healthy.store(true, Ordering::SeqCst);

        let app = Router::new()
            .route("/api/auth.test", post(auth_test_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> url::Url {
        format!("http://{}/api/auth.test", self.addr).parse().unwrap()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.state.calls.load(Ordering::SeqCst)
    }
}

async fn auth_test_handler(
    State(state): State<Arc<AuthorityState>>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {TEST_BOT_TOKEN}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    let body = if authorized && state.healthy.load(Ordering::SeqCst) {
        r#"{"ok":true,"team":"T123"}"#
    } else if authorized {
        r#"{"ok":false,"error":"account_inactive"}"#
    } else {
        r#"{"ok":false,"error":"invalid_auth"}"#
    };
    ([(header::CONTENT_TYPE, "application/json")], body)
}

// ============================================================================
// Gateway
// ============================================================================

/// A gateway served on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    shutdown: CancellationToken,
}

impl TestGateway {
    /// Configuration pointing at `upstream` and `authority`.
    pub fn config(upstream: SocketAddr, authority: url::Url) -> GatewayConfig {
        let mut config = GatewayConfig::defaults();
        config.bind = "127.0.0.1".into();
        config.port = 0;
        config.upstream_port = upstream.port();
        config.bearer_token = Some(TEST_TOKEN.into());
        config.health_check_url = authority;
        config.health_token = Some(TEST_BOT_TOKEN.into());
        config.health_timeout = Duration::from_secs(2);
        config.upstream_timeout = Duration::from_secs(2);
        config
    }

    /// Serve a gateway built from `config`.
    pub async fn start(config: GatewayConfig) -> Self {
        let gateway = Gateway::from_config(Arc::new(config)).unwrap();
        Self::serve(gateway).await
    }

    /// Serve a gateway that limits with `limiter` instead of the default.
    pub async fn start_with_limiter(config: GatewayConfig, limiter: RateLimiterConfig) -> Self {
        let config = Arc::new(config);
        let verifier = CredentialVerifier::new(config.required_credential());
        let limiter = Arc::new(FixedWindowRateLimiter::new(limiter));
        let gateway = Gateway::with_limiter(config, verifier, limiter).unwrap();
        Self::serve(gateway).await
    }

    async fn serve(gateway: Gateway) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(gateway.clone().serve(listener, shutdown.clone()));
        Self {
            addr,
            gateway,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
