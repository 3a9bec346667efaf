//! Common test utilities for llm-proxy
//!
//! Provides a recording observation sink and a harness that wires a wiremock
//! upstream to a proxy router served by `axum_test::TestServer`. The server
//! listens on a real socket so responses go through hyper's own body writer,
//! which stops reading a fixed-length body once its length is written.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum_test::{TestServer, TestServerConfig};
use llm_proxy::{
    config::RelayMode, observe::RelayOutcome, routes, AppState, Config, ObservationSink,
};
use wiremock::MockServer;

/// Observation sink that records every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// All recorded events: `begin`, `fragment:<text>`, `end:<outcome>`
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Fragments only, in arrival order
    pub fn fragments(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("fragment:").map(str::to_string))
            .collect()
    }

    /// Wait until `count` responses have finished decoding
    pub async fn wait_for_end(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let ended = self
                .events()
                .iter()
                .filter(|e| e.starts_with("end:"))
                .count();
            if ended >= count {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("decoder did not finish: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl ObservationSink for RecordingSink {
    fn begin(&self, _trace_id: &str) {
        self.events.lock().unwrap().push("begin".to_string());
    }

    fn fragment(&self, _trace_id: &str, text: &str) {
        self.events.lock().unwrap().push(format!("fragment:{}", text));
    }

    fn end(&self, _trace_id: &str, outcome: RelayOutcome) {
        self.events.lock().unwrap().push(format!("end:{}", outcome));
    }
}

/// Proxy under test with its mock upstream and recording sink
pub struct ProxyHarness {
    pub upstream: MockServer,
    pub server: TestServer,
    pub sink: Arc<RecordingSink>,
}

impl ProxyHarness {
    /// Proxy in the default streaming mode
    pub async fn new() -> Self {
        Self::with_mode(RelayMode::Streaming).await
    }

    /// Proxy using the given relay mode
    pub async fn with_mode(mode: RelayMode) -> Self {
        let upstream = MockServer::start().await;

        let mut config = Config::new(upstream.uri());
        config.relay_mode = mode;
        config.inspect_queue_capacity = 2;

        let sink = Arc::new(RecordingSink::default());
        let server = server_for(config, sink.clone());

        Self {
            upstream,
            server,
            sink,
        }
    }

    /// Authority the proxy should present as Host upstream
    pub fn upstream_authority(&self) -> String {
        self.upstream
            .uri()
            .trim_start_matches("http://")
            .to_string()
    }
}

/// Build a test server for an arbitrary configuration
pub fn server_for(config: Config, sink: Arc<RecordingSink>) -> TestServer {
    let state = Arc::new(AppState::with_sink(config, sink).expect("valid test config"));
    let app = routes::create_router(state);
    let server_config = TestServerConfig::builder().http_transport().build();
    TestServer::new_with_config(app, server_config).expect("Failed to create test server")
}

/// Canned upstream bodies
pub mod bodies {
    /// Three SSE lines: two deltas and the terminator
    pub const SSE_HELLO: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
        "data: [DONE]\n"
    );

    /// Realistic OpenAI stream with role chunk, keep-alive comment and finish chunk
    pub const SSE_OPENAI: &str = concat!(
        ": keep-alive\n\n",
        "data: {\"id\":\"chatcmpl-test123\",\"object\":\"chat.completion.chunk\",\"created\":1706745600,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-test123\",\"object\":\"chat.completion.chunk\",\"created\":1706745600,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-test123\",\"object\":\"chat.completion.chunk\",\"created\":1706745600,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"!\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-test123\",\"object\":\"chat.completion.chunk\",\"created\":1706745600,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n"
    );

    /// Ollama-style JSON lines stream
    pub const JSON_LINES: &str = concat!(
        "{\"choices\":[{\"delta\":{\"content\":\"The\"}}]}\n",
        "{\"choices\":[{\"delta\":{\"content\":\" answer\"}}]}\n",
        "{\"choices\":[{\"delta\":{}}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n"
    );

    /// Non-streaming completion
    pub const COMPLETION: &str = r#"{"choices":[{"message":{"content":"Answer"}}],"id":"x"}"#;
}
