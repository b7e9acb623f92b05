//! Health probe for the unauthenticated `/health` route.
//!
//! Every probe is a live round-trip to the identity-verification endpoint
//! (Slack `auth.test` by default) with the bot credential. The outcome is
//! binary; every failure mode collapses to [`HealthStatus::Unhealthy`] and is
//! only visible in the logs.

use std::time::Duration;

use axum::response::{IntoResponse, Response};
use http::{StatusCode, header};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::error::GatewayError;

/// Content type the authority expects on the probe request.
pub const PROBE_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Binary health as reported on `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Authority answered with a truthy `ok` (200, "ok").
    Healthy,
    /// Anything else (503, "ng").
    Unhealthy,
}

impl HealthStatus {
    /// HTTP status reported for this outcome.
    pub fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short text body reported for this outcome.
    pub fn body(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "ok",
            HealthStatus::Unhealthy => "ng",
        }
    }
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body(),
        )
            .into_response()
    }
}

/// Reasons a probe did not come back healthy.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no health check credential configured")]
    MissingCredential,
    #[error("health check request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("health check response was not JSON: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("health authority reported failure (ok = {0})")]
    Negative(Value),
}

/// Calls the health authority once per probe.
#[derive(Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    url: Url,
    credential: Option<String>,
}

impl HealthProber {
    /// Build a prober whose round-trips are bounded by `timeout`.
    pub fn new(url: Url, credential: Option<&str>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Client(format!("health check client: {e}")))?;
        Ok(Self {
            client,
            url,
            credential: credential.filter(|c| !c.is_empty()).map(str::to_owned),
        })
    }

    /// Target endpoint of the probe.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Run one probe. Never fails; errors are logged and reported unhealthy.
    pub async fn probe(&self) -> HealthStatus {
        match self.check().await {
            Ok(()) => {
                debug!(url = %self.url, "Health probe succeeded");
                HealthStatus::Healthy
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Health probe failed");
                HealthStatus::Unhealthy
            }
        }
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let credential = self
            .credential
            .as_deref()
            .ok_or(ProbeError::MissingCredential)?;

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(credential)
            .header(header::CONTENT_TYPE, PROBE_CONTENT_TYPE)
            .body("")
            .send()
            .await
            .map_err(ProbeError::Transport)?;

        // The authority signals failure in the body; the status is not consulted.
        let payload: Value = response.json().await.map_err(ProbeError::Decode)?;
        let ok = payload.get("ok").cloned().unwrap_or(Value::Null);
        if is_truthy(&ok) {
            Ok(())
        } else {
            Err(ProbeError::Negative(ok))
        }
    }
}

/// JSON truthiness: `false`, `null`, `0`, and `""` are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
