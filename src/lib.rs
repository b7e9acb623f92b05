//! mcpgate - Authenticating, rate-limited front door for a loopback MCP server.
//!
//! This library provides the gateway router, its request pipeline stages,
//! and the health probe used by the `mcpgate` binary.
//!
//! # Routes
//!
//! - **`/mcp` (and subpaths):** bearer credential check, fixed-window rate
//!   limit, then a streaming relay to the upstream MCP server.
//! - **`/health`:** live probe of an identity-verification endpoint, answered
//!   with `200 ok` or `503 ng`. Never authenticated or rate limited.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging_layer;
pub mod proxy_service;
pub mod rate_limiter;
pub mod timeout;
