//! Tower layer for structured request/response logging.
//!
//! Wraps `tower_http::trace::TraceLayer` with callbacks that attach a
//! request ID to every span and redact credential-bearing headers.
//! Header dumps only happen at DEBUG.

use http::HeaderMap;
use std::fmt;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{info, warn};

/// Headers that are redacted from logs.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
    "set-cookie",
];

/// Trace layer type produced by [`logging_layer`].
pub type GatewayTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    DefaultOnBodyChunk,
    DefaultOnEos,
    OnFailureLogger,
>;

/// Create the logging/tracing layer.
pub fn logging_layer() -> GatewayTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Span creator that attaches a `request_id` to every request span.
///
/// Uses `x-request-id` when the client sent one, a fresh UUID otherwise.
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            version = ?request.version(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &http::Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            path = %request.uri().path(),
            direction = "inbound",
            "Request received"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                headers = ?sanitize_headers(request.headers()),
                "Request details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &http::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = %response.status().as_u16(),
            latency_ms = latency.as_millis(),
            direction = "outbound",
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                headers = ?sanitize_headers(response.headers()),
                "Response details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<ServerErrorsFailureClass> for OnFailureLogger {
    fn on_failure(
        &mut self,
        failure: ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            direction = "error",
            "Request failed"
        );
    }
}

// ============================================================================
// Header Redaction
// ============================================================================

/// Zero-allocation wrapper that formats headers with secrets redacted.
pub struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_HEADERS_TO_LOG: usize = 50;
        const MAX_VALUE_LEN: usize = 1024;

        let mut map = f.debug_map();
        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more headers)", self.0.len() - idx));
                break;
            }

            let name_str = name.as_str();
            let is_sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|&sensitive| name_str.eq_ignore_ascii_case(sensitive));

            if is_sensitive {
                map.entry(&name_str, &"[REDACTED]");
                continue;
            }

            match value.to_str() {
                Ok(val_str) if val_str.len() <= MAX_VALUE_LEN => {
                    map.entry(&name_str, &val_str);
                }
                Ok(val_str) => {
                    map.entry(
                        &name_str,
                        &format!("{}... ({} bytes)", &val_str[..MAX_VALUE_LEN], val_str.len()),
                    );
                }
                Err(_) => {
                    map.entry(&name_str, &format!("<binary: {} bytes>", value.len()));
                }
            }
        }
        map.finish()
    }
}

/// Wrap headers for redacted `Debug` output.
#[inline]
pub fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders<'_> {
    SanitizedHeaders(headers)
}
