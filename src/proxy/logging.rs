//! Request logging for proxied traffic
//!
//! Structured logging with short correlation IDs so a relayed response, its
//! decoder task, and any failure can be tied back to one inbound request.

use std::time::Instant;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

/// Context for tracking a request through the relay
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for log correlation)
    pub trace_id: String,
    /// When the request started
    pub start_time: Instant,
    /// HTTP method of the inbound request
    pub method: String,
    /// Path and query of the inbound request
    pub path: String,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string()[..8].to_string(), // Short ID for readability
            start_time: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    /// Log request initiation
    pub fn log_request_start(&self) {
        info!(
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            "Request started"
        );
    }

    /// Log request being sent to upstream
    pub fn log_upstream_request(&self, url: &str, body_size: Option<u64>, header_count: usize) {
        debug!(
            trace_id = %self.trace_id,
            url = %url,
            body_size = ?body_size,
            header_count = header_count,
            elapsed_ms = %self.elapsed_ms(),
            "Sending request to upstream"
        );
    }

    /// Log response received from upstream
    pub fn log_upstream_response(&self, status: u16, content_length: Option<u64>) {
        info!(
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            status = %status,
            content_length = ?content_length,
            elapsed_ms = %self.elapsed_ms(),
            "Response received from upstream"
        );
    }

    /// Log relay finished with the full body delivered
    pub fn log_stream_ended(&self, chunks: usize, bytes: u64) {
        info!(
            trace_id = %self.trace_id,
            path = %self.path,
            chunks = chunks,
            bytes = bytes,
            elapsed_ms = %self.elapsed_ms(),
            "Response relay completed"
        );
    }

    /// Log client going away before the body was fully delivered
    pub fn log_client_disconnected(&self, chunks: usize, bytes: u64) {
        warn!(
            trace_id = %self.trace_id,
            path = %self.path,
            chunks = chunks,
            bytes = bytes,
            elapsed_ms = %self.elapsed_ms(),
            "Client disconnected before relay completed"
        );
    }

    /// Log upstream body failing mid-relay
    pub fn log_stream_error(&self, error: &str, bytes: u64) {
        error!(
            trace_id = %self.trace_id,
            path = %self.path,
            bytes = bytes,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Error relaying upstream body"
        );
    }

    /// Log the client's request body failing while it was streamed upstream
    pub fn log_request_body_error(&self, error: &str) {
        warn!(
            trace_id = %self.trace_id,
            path = %self.path,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Failed to read request body"
        );
    }

    /// Log connection error (specific for debugging connectivity issues)
    pub fn log_connection_error(&self, error: &str, url: &str) {
        error!(
            trace_id = %self.trace_id,
            url = %url,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Connection to upstream failed"
        );
    }

    /// Create a tracing span for this request
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "proxy_request",
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
        )
    }
}
