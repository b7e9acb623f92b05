//! Process-wide gateway configuration.
//!
//! Parsed once at startup from CLI flags with environment fallbacks and
//! shared by `Arc` afterwards. Nothing here is mutated after `main` hands it
//! to [`crate::gateway::Gateway`].

use std::fmt;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

/// Default listening port for the gateway.
pub const DEFAULT_PORT: u16 = 10000;

/// Default loopback port of the upstream MCP server.
pub const DEFAULT_UPSTREAM_PORT: u16 = 18080;

/// Default identity-verification endpoint used by the health probe.
pub const DEFAULT_HEALTH_CHECK_URL: &str = "https://slack.com/api/auth.test";

/// How rate-limit windows are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyStrategy {
    /// One window per peer IP address.
    ClientIp,
    /// One window shared by every client.
    Global,
}

/// Runtime configuration for the gateway.
#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct GatewayConfig {
    /// Bind address for the public listener
    #[arg(short, long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port the gateway listens on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Host of the upstream MCP server
    #[arg(long, env = "MCP_HOST", default_value = "127.0.0.1")]
    pub upstream_host: String,

    /// Port of the upstream MCP server
    #[arg(long, env = "MCP_PORT", default_value_t = DEFAULT_UPSTREAM_PORT)]
    pub upstream_port: u16,

    /// Bearer token clients must present on /mcp. When unset every /mcp
    /// request is answered with 500.
    #[arg(long, env = "MCP_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Endpoint called by the /health probe
    #[arg(long, env = "HEALTH_CHECK_URL", default_value = DEFAULT_HEALTH_CHECK_URL)]
    pub health_check_url: Url,

    /// Bearer token sent to the health endpoint
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub health_token: Option<String>,

    /// Upper bound on one health probe round-trip
    #[arg(long, env = "HEALTH_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub health_timeout: Duration,

    /// Upper bound on waiting for upstream response headers
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub upstream_timeout: Duration,

    /// Maximum silence between two upstream body chunks
    #[arg(long, env = "UPSTREAM_IDLE_TIMEOUT", default_value = "5m", value_parser = humantime::parse_duration)]
    pub upstream_idle_timeout: Duration,

    /// Maximum lifetime of one streamed upstream response
    #[arg(long, env = "UPSTREAM_STREAM_TIMEOUT", default_value = "1h", value_parser = humantime::parse_duration)]
    pub upstream_stream_timeout: Duration,

    /// How long to wait for the upstream to accept connections at startup (0s disables)
    #[arg(long, env = "UPSTREAM_READY_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub upstream_ready_timeout: Duration,

    /// Rate-limit key strategy
    #[arg(long, env = "RATE_LIMIT_KEY", value_enum, default_value_t = KeyStrategy::ClientIp)]
    pub rate_limit_key: KeyStrategy,
}

impl GatewayConfig {
    /// Configuration with every default applied and no credentials set.
    pub fn defaults() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            upstream_host: "127.0.0.1".to_string(),
            upstream_port: DEFAULT_UPSTREAM_PORT,
            bearer_token: None,
            health_check_url: default_health_check_url(),
            health_token: None,
            health_timeout: Duration::from_secs(5),
            upstream_timeout: Duration::from_secs(30),
            upstream_idle_timeout: Duration::from_secs(300),
            upstream_stream_timeout: Duration::from_secs(3600),
            upstream_ready_timeout: Duration::from_secs(30),
            rate_limit_key: KeyStrategy::ClientIp,
        }
    }

    /// The credential `/mcp` requires, treating an empty value as unset.
    pub fn required_credential(&self) -> Option<&str> {
        self.bearer_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The credential sent to the health endpoint, treating empty as unset.
    pub fn health_credential(&self) -> Option<&str> {
        self.health_token.as_deref().filter(|t| !t.is_empty())
    }

    /// `host:port` of the upstream MCP server.
    pub fn upstream_authority(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }

    /// `host:port` the gateway binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn default_health_check_url() -> Url {
    Url::parse(DEFAULT_HEALTH_CHECK_URL).expect("BUG: default health check URL is valid")
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("upstream_host", &self.upstream_host)
            .field("upstream_port", &self.upstream_port)
            .field("bearer_token", &self.required_credential().map(|_| "[REDACTED]"))
            .field("health_check_url", &self.health_check_url.as_str())
            .field("health_token", &self.health_credential().map(|_| "[REDACTED]"))
            .field("health_timeout", &self.health_timeout)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("upstream_idle_timeout", &self.upstream_idle_timeout)
            .field("upstream_stream_timeout", &self.upstream_stream_timeout)
            .field("upstream_ready_timeout", &self.upstream_ready_timeout)
            .field("rate_limit_key", &self.rate_limit_key)
            .finish()
    }
}
