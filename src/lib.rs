//! llm-proxy - transparent relay for OpenAI-compatible completion servers
//!
//! Forwards every request to one upstream and relays the response to the
//! caller byte-for-byte, while a separate task decodes the same bytes and
//! writes the model's answer to an observation sink as it streams in.

pub mod config;
pub mod decoder;
pub mod error;
pub mod observe;
pub mod proxy;
pub mod relay;
pub mod routes;
pub mod streaming;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

pub use crate::config::Config;
pub use crate::observe::ObservationSink;
pub use crate::proxy::UpstreamClient;
pub use crate::relay::DualSinkRelay;

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    /// Process-wide upstream client with its connection pool
    pub upstream: Arc<UpstreamClient>,
    /// Relay feeding the configured observation sink
    pub relay: DualSinkRelay,
    pub start_time: Instant,
}

impl AppState {
    /// Create application state with the sink selected by configuration
    pub fn new(config: Config) -> Result<Self> {
        let sink = observe::sink_for(config.observe);
        Self::with_sink(config, sink)
    }

    /// Create application state writing observations to `sink`
    pub fn with_sink(config: Config, sink: Arc<dyn ObservationSink>) -> Result<Self> {
        config.validate()?;

        // Initialize HTTP client with connection pooling
        let upstream = Arc::new(UpstreamClient::new(&config)?);
        let relay = DualSinkRelay::new(sink, config.inspect_queue_capacity);

        Ok(Self {
            config,
            upstream,
            relay,
            start_time: Instant::now(),
        })
    }
}
