//! Bearer credential verification for the protected `/mcp` route.
//!
//! The verifier is a pure admit/reject decision over request headers. It
//! fails closed: with no credential configured nothing is admitted, and that
//! case is reported as [`AuthError::Misconfigured`] so it stays
//! distinguishable from a client presenting the wrong token.

use std::fmt;

use http::{HeaderMap, header};
use thiserror::Error;

use crate::error::GatewayError;

/// Scheme prefix accepted in the `Authorization` header. Case-sensitive.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Why a request was not admitted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The gateway has no credential to compare against.
    #[error("no bearer credential configured")]
    Misconfigured,
    /// Header missing, wrong scheme, or wrong value.
    #[error("missing or invalid bearer credential")]
    Unauthorized,
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Misconfigured => GatewayError::Misconfigured,
            AuthError::Unauthorized => GatewayError::Unauthorized,
        }
    }
}

/// Checks `Authorization: Bearer <token>` against the configured token.
#[derive(Clone)]
pub struct CredentialVerifier {
    required: Option<String>,
}

impl CredentialVerifier {
    /// Create a verifier. `None` or an empty string means misconfigured.
    pub fn new(required: Option<&str>) -> Self {
        Self {
            required: required.filter(|t| !t.is_empty()).map(str::to_owned),
        }
    }

    /// Whether a credential is configured at all.
    pub fn is_configured(&self) -> bool {
        self.required.is_some()
    }

    /// Admit or reject a request based on its headers.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let required = self.required.as_deref().ok_or(AuthError::Misconfigured)?;

        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or(AuthError::Unauthorized)?;

        if presented == required {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Return the token following the `Bearer ` prefix, if the prefix is there.
#[cfg(feature = "fuzzing")]
pub fn extract_bearer(value: &str) -> Option<&str> {
    extract_bearer_impl(value)
}

#[cfg(not(feature = "fuzzing"))]
fn extract_bearer(value: &str) -> Option<&str> {
    extract_bearer_impl(value)
}

fn extract_bearer_impl(value: &str) -> Option<&str> {
    value.strip_prefix(BEARER_PREFIX)
}
