//! Configuration management for llm-proxy
//!
//! Configuration is loaded from environment variables and validated once at
//! startup. Any failure here is fatal: the relay is never constructed with an
//! invalid target.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Accepted shape of the upstream target address
static TARGET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[a-zA-Z0-9.-]+:[0-9]+$").expect("valid target regex"));

/// How upstream response bodies are relayed to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Always tee the body through the streaming relay
    Streaming,
    /// Buffer bodies with a declared length that are not event streams
    Auto,
}

impl FromStr for RelayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" | "stream" => Ok(Self::Streaming),
            "auto" => Ok(Self::Auto),
            other => bail!("Unknown relay mode '{}', expected 'streaming' or 'auto'", other),
        }
    }
}

/// Where extracted answer text is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveTarget {
    /// Raw text on standard output, flushed per fragment
    Stdout,
    /// One tracing event per fragment
    Log,
}

impl FromStr for ObserveTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "log" | "tracing" => Ok(Self::Log),
            other => bail!("Unknown observation target '{}', expected 'stdout' or 'log'", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Upstream base URL in `scheme://host:port` form
    pub target_url: String,

    /// Dial timeout for upstream connections
    pub connect_timeout: Duration,
    /// TCP keep-alive interval for upstream connections
    pub tcp_keepalive: Duration,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per upstream host
    pub pool_max_idle_per_host: usize,

    /// Capacity of the inspect queue, in chunks
    pub inspect_queue_capacity: usize,
    /// Relay strategy for response bodies
    pub relay_mode: RelayMode,
    /// Destination of extracted answer text
    pub observe: ObserveTarget,

    /// Optional port for the admin listener (metrics, liveness)
    pub admin_port: Option<u16>,
    /// Emit logs as JSON
    pub log_json: bool,
}

impl Config {
    /// Build a configuration with defaults for the given target
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            target_url: target_url.into(),
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 100,
            inspect_queue_capacity: 64,
            relay_mode: RelayMode::Streaming,
            observe: ObserveTarget::Stdout,
            admin_port: None,
            log_json: false,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let target_url = env::var("LLM_PROXY_TARGET")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());

        let config = Self {
            host: env::var("LLM_PROXY_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: parse_port(
                &env::var("LLM_PROXY_PORT").unwrap_or_else(|_| "8080".to_string()),
            )
            .context("Invalid LLM_PROXY_PORT")?,

            target_url,

            connect_timeout: Duration::from_secs(
                env_or("LLM_PROXY_CONNECT_TIMEOUT_SECS", "30")
                    .parse()
                    .context("Invalid LLM_PROXY_CONNECT_TIMEOUT_SECS")?,
            ),
            tcp_keepalive: Duration::from_secs(
                env_or("LLM_PROXY_TCP_KEEPALIVE_SECS", "30")
                    .parse()
                    .context("Invalid LLM_PROXY_TCP_KEEPALIVE_SECS")?,
            ),
            pool_idle_timeout: Duration::from_secs(
                env_or("LLM_PROXY_POOL_IDLE_TIMEOUT_SECS", "90")
                    .parse()
                    .context("Invalid LLM_PROXY_POOL_IDLE_TIMEOUT_SECS")?,
            ),
            pool_max_idle_per_host: env_or("LLM_PROXY_POOL_MAX_IDLE", "100")
                .parse()
                .context("Invalid LLM_PROXY_POOL_MAX_IDLE")?,

            inspect_queue_capacity: env_or("LLM_PROXY_INSPECT_QUEUE", "64")
                .parse()
                .context("Invalid LLM_PROXY_INSPECT_QUEUE")?,
            relay_mode: env_or("LLM_PROXY_RELAY_MODE", "streaming")
                .parse()
                .context("Invalid LLM_PROXY_RELAY_MODE")?,
            observe: env_or("LLM_PROXY_OBSERVE", "stdout")
                .parse()
                .context("Invalid LLM_PROXY_OBSERVE")?,

            admin_port: env::var("LLM_PROXY_ADMIN_PORT")
                .ok()
                .map(|v| parse_port(&v))
                .transpose()
                .context("Invalid LLM_PROXY_ADMIN_PORT")?,
            log_json: env::var("LLM_PROXY_LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the values that cannot be expressed through parsing alone
    pub fn validate(&self) -> Result<()> {
        validate_target(&self.target_url)?;

        if self.port == 0 {
            bail!("Invalid port number: 0. Port must be between 1 and 65535");
        }
        if self.inspect_queue_capacity == 0 {
            bail!("Inspect queue capacity must be at least 1");
        }

        Ok(())
    }

    /// Target authority with the scheme stripped, used as the upstream Host
    pub fn target_authority(&self) -> &str {
        self.target_url
            .strip_prefix("http://")
            .or_else(|| self.target_url.strip_prefix("https://"))
            .unwrap_or(&self.target_url)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_port(value: &str) -> Result<u16> {
    let port: u32 = value
        .trim()
        .parse()
        .with_context(|| format!("Port must be a number, got '{}'", value))?;

    if !(1..=65535).contains(&port) {
        bail!("Invalid port number: {}. Port must be between 1 and 65535", port);
    }

    Ok(port as u16)
}

/// Validate an upstream address of the form `http[s]://hostname:port`
pub fn validate_target(target: &str) -> Result<()> {
    if !TARGET_PATTERN.is_match(target) {
        bail!(
            "Invalid target address format: {}. Must be in format 'http[s]://hostname:port'",
            target
        );
    }

    let port = target.rsplit(':').next().unwrap_or_default();
    parse_port(port).with_context(|| format!("Invalid target port: {}", port))?;

    Ok(())
}
