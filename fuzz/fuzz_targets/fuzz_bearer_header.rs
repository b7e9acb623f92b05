#![no_main]

//! Fuzz target for the `/mcp` credential check.
//!
//! # Goal
//! Arbitrary `Authorization` values and header names must never panic, and
//! only the exact `Bearer <token>` form may be admitted.

use arbitrary::Arbitrary;
use http::{HeaderMap, HeaderValue, header};
use libfuzzer_sys::fuzz_target;
use mcpgate::auth::{CredentialVerifier, extract_bearer};
use mcpgate::proxy_service::is_hop_by_hop_header;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    token: &'a str,
    header_value: &'a [u8],
    header_name: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    if let Ok(text) = std::str::from_utf8(input.header_value) {
        if let Some(presented) = extract_bearer(text) {
            assert_eq!(text.len(), presented.len() + "Bearer ".len());
        }
    }

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_bytes(input.header_value) {
        headers.insert(header::AUTHORIZATION, value);
    }

    let verifier = CredentialVerifier::new(Some(input.token));
    let admitted = verifier.verify(&headers).is_ok();
    if admitted {
        let expected = format!("Bearer {}", input.token);
        assert!(!input.token.is_empty());
        assert_eq!(input.header_value, expected.as_bytes());
    }

    let _ = is_hop_by_hop_header(input.header_name);
});
