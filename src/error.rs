//! Error types for the gateway request pipeline.
//!
//! Every variant is local to the request that produced it. None of them
//! terminate the process; each maps to a complete HTTP response.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{StatusCode, header};
use thiserror::Error;

/// Body sent with 429 responses.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

/// Errors surfaced by the gateway while handling a request.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No bearer credential is configured, so `/mcp` fails closed (500).
    #[error("gateway has no bearer credential configured")]
    Misconfigured,

    /// Missing, malformed or wrong bearer credential (401).
    #[error("unauthorized")]
    Unauthorized,

    /// Request budget for the current window is spent (429).
    #[error("rate limit exceeded")]
    RateLimited,

    /// Upstream could not be reached or broke the exchange (502).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream did not produce response headers in time (504).
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// The upstream target URI could not be built from the configured authority (502).
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// An outbound HTTP client could not be constructed at startup.
    #[error("client setup failed: {0}")]
    Client(String),
}

impl GatewayError {
    /// HTTP status code this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Misconfigured | GatewayError::Client(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::InvalidUri(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> &'static str {
        match self {
            GatewayError::Misconfigured => "server not configured",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::RateLimited => RATE_LIMITED_MESSAGE,
            GatewayError::UpstreamUnavailable(_) => {
                "502 Bad Gateway\n\nFailed to connect to upstream server."
            }
            GatewayError::UpstreamTimeout(_) => {
                "504 Gateway Timeout\n\nUpstream server did not respond in time."
            }
            GatewayError::InvalidUri(_) => {
                "502 Bad Gateway\n\nUpstream address is misconfigured."
            }
            GatewayError::Client(_) => "500 Internal Server Error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Upstream detail stays in the logs; callers only see the fixed body.
        Response::builder()
            .status(self.status())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(self.body()))
            .unwrap_or_else(|_| {
                let mut resp = Response::new(Body::from("500 Internal Server Error"));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            })
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
