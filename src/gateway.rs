//! Gateway router: owns the components and wires the two routes.
//!
//! # Routes
//!
//! ```text
//! GET  /health            ──► HealthProber                (no auth, no limit)
//! ANY  /mcp, /mcp/{*rest} ──► CredentialVerifier
//!                               └─► FixedWindowRateLimiter
//!                                     └─► ForwardingProxy
//! ```
//!
//! The protected stages run in that order and stop at the first rejection,
//! so a request the verifier turns away never spends rate-limit budget.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, CredentialVerifier};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthProber, HealthStatus};
use crate::logging_layer::logging_layer;
use crate::proxy_service::{ForwardingProxy, ProxyConfig};
use crate::rate_limiter::{FixedWindowRateLimiter, RateLimiterConfig};

/// Path prefix of the protected route family.
pub const PROTECTED_PREFIX: &str = "/mcp";

/// Path of the unauthenticated health route.
pub const HEALTH_PATH: &str = "/health";

/// Process-wide gateway state, built once at startup.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: Arc<GatewayConfig>,
    verifier: CredentialVerifier,
    limiter: Arc<FixedWindowRateLimiter>,
    prober: HealthProber,
    proxy: ForwardingProxy,
}

impl Gateway {
    /// Build every component from the configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Client` if the health-check HTTP client cannot
    /// be constructed. A missing bearer credential is not an error here.
    pub fn from_config(config: Arc<GatewayConfig>) -> GatewayResult<Self> {
        let verifier = CredentialVerifier::new(config.required_credential());
        let limiter = Arc::new(FixedWindowRateLimiter::new(RateLimiterConfig {
            key_strategy: config.rate_limit_key,
            ..RateLimiterConfig::default()
        }));
        Self::with_limiter(config, verifier, limiter)
    }

    /// Build the gateway around an existing rate limiter.
    pub fn with_limiter(
        config: Arc<GatewayConfig>,
        verifier: CredentialVerifier,
        limiter: Arc<FixedWindowRateLimiter>,
    ) -> GatewayResult<Self> {
        let prober = HealthProber::new(
            config.health_check_url.clone(),
            config.health_credential(),
            config.health_timeout,
        )?;
        let proxy = ForwardingProxy::new(
            config.upstream_authority(),
            ProxyConfig::from_gateway(&config),
        );

        if !verifier.is_configured() {
            warn!("No bearer credential configured; every /mcp request will be refused with 500");
        }

        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                verifier,
                limiter,
                prober,
                proxy,
            }),
        })
    }

    /// The configuration this gateway was built from.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &Arc<FixedWindowRateLimiter> {
        &self.inner.limiter
    }

    /// The forwarding proxy.
    pub fn proxy(&self) -> &ForwardingProxy {
        &self.inner.proxy
    }

    /// Create the axum router with both routes and the trace layer.
    pub fn router(&self) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .route(PROTECTED_PREFIX, any(protected_handler))
            .route("/mcp/", any(protected_handler))
            .route("/mcp/{*rest}", any(protected_handler))
            .with_state(self.clone())
            .layer(logging_layer())
    }

    /// Serve on `listener` until `shutdown` is cancelled.
    ///
    /// Also runs the rate-limit window sweeper for the same lifetime.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        self.inner.limiter.spawn_cleanup_task(shutdown.clone());

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Gateway shutting down, draining in-flight requests");
            })
            .await
    }

    /// Run the protected pipeline for one request.
    ///
    /// Verifier, then limiter, then proxy. Rate-limit headers are attached to
    /// every response the limiter saw, including upstream failures.
    pub async fn handle_protected(&self, req: Request) -> Response {
        if let Err(e) = self.inner.verifier.verify(req.headers()) {
            match &e {
                AuthError::Misconfigured => {
                    warn!(path = %req.uri().path(), "Refusing /mcp request: no credential configured")
                }
                AuthError::Unauthorized => {
                    debug!(path = %req.uri().path(), "Refusing /mcp request: bad credential")
                }
            }
            return GatewayError::from(e).into_response();
        }

        let key = self.inner.limiter.key_for(peer_ip(&req));
        let status = self.inner.limiter.check(key);
        if !status.admitted {
            info!(key = ?key, reset_secs = status.reset_secs(), "Rate limited /mcp request");
            let mut resp = GatewayError::RateLimited.into_response();
            status.apply_headers(resp.headers_mut());
            return resp;
        }

        let mut resp = match self.inner.proxy.forward(req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "Forwarding to upstream failed");
                e.into_response()
            }
        };
        status.apply_headers(resp.headers_mut());
        resp
    }

    /// Run one health probe.
    pub async fn handle_health(&self) -> HealthStatus {
        self.inner.prober.probe().await
    }
}

fn peer_ip<B>(req: &http::Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

async fn health_handler(State(gateway): State<Gateway>) -> HealthStatus {
    gateway.handle_health().await
}

async fn protected_handler(State(gateway): State<Gateway>, req: Request<Body>) -> Response {
    gateway.handle_protected(req).await
}
