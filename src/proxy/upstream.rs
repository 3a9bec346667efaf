//! Upstream client
//!
//! Forwards inbound requests to the configured target. One instance, with
//! its connection pool, lives for the whole process and is shared by every
//! request through `AppState`. Request bodies are streamed upstream as they
//! arrive rather than collected first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use futures::TryStreamExt;
use tracing::instrument;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    proxy::{headers::build_upstream_headers, logging::RequestContext},
    routes::metrics::record_upstream_error,
};

/// Client for the single upstream target
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    authority: String,
}

impl UpstreamClient {
    /// Build the process-wide client with pooling and dial settings from config
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .tcp_keepalive(Some(config.tcp_keepalive))
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http1_only()
            // Redirects belong to the caller, not the relay
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.target_url.trim_end_matches('/').to_string(),
            authority: config.target_authority().to_string(),
        }
    }

    /// Full upstream URL for an inbound path and query
    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Forward a request and return the upstream response with its body unread.
    ///
    /// The body is streamed. The client's `Content-Length`, when it sent one,
    /// frames the upstream request; otherwise a non-empty body goes chunked.
    #[instrument(skip(self, ctx, incoming_headers, body), fields(trace_id = %ctx.trace_id))]
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        method: Method,
        path_and_query: &str,
        incoming_headers: &HeaderMap,
        body: Body,
    ) -> AppResult<reqwest::Response> {
        let url = self.target_url(path_and_query);
        let headers = build_upstream_headers(incoming_headers, &self.authority)?;
        let body_size = body.size_hint().exact();

        ctx.log_upstream_request(&url, body_size, headers.len());

        let client_body_failed = Arc::new(AtomicBool::new(false));
        let upstream_body = if body_size == Some(0) {
            reqwest::Body::from(Bytes::new())
        } else {
            let failed = client_body_failed.clone();
            reqwest::Body::wrap_stream(
                body.into_data_stream()
                    .inspect_err(move |_| failed.store(true, Ordering::Relaxed)),
            )
        };

        self.client
            .request(method, &url)
            .headers(headers)
            .body(upstream_body)
            .send()
            .await
            .map_err(|e| {
                if client_body_failed.load(Ordering::Relaxed) {
                    ctx.log_request_body_error(&e.to_string());
                    return AppError::BadRequest(format!("Failed to read request body: {}", e));
                }
                ctx.log_connection_error(&e.to_string(), &url);
                record_upstream_error("connect");
                AppError::UpstreamError(e.to_string())
            })
    }
}
