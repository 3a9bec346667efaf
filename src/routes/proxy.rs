//! Catch-all proxy handler
//!
//! Every method and path on the proxy listener lands here. The request is
//! forwarded to the target; the upstream status and headers are copied to the
//! client, and the body goes through the dual-sink relay so the answer is
//! observed while the client receives the original bytes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
};
use tracing::Instrument;

use crate::{
    error::AppResult,
    proxy::{headers::filter_response_headers, RequestContext},
    relay::{declared_body_len, should_buffer},
    routes::metrics::record_request,
    AppState,
};

/// Forward any request to the upstream and relay its response
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let ctx = RequestContext::new(parts.method.as_str(), &path_and_query);
    let span = ctx.create_span();

    async move {
        ctx.log_request_start();

        let upstream = state
            .upstream
            .forward(&ctx, parts.method.clone(), &path_and_query, &parts.headers, body)
            .await?;

        let status = upstream.status();
        let headers = filter_response_headers(upstream.headers());

        ctx.log_upstream_response(status.as_u16(), upstream.content_length());
        record_request(status.as_u16(), ctx.start_time.elapsed().as_secs_f64());

        let body = if should_buffer(state.config.relay_mode, upstream.headers()) {
            Body::from(state.relay.relay_buffered(upstream, &ctx).await?)
        } else {
            let declared_len = declared_body_len(&parts.method, status, upstream.headers());
            // The decoder task runs detached and ends with the body stream
            state
                .relay
                .start(upstream.bytes_stream(), declared_len, &ctx)
                .body
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
    .instrument(span)
    .await
}
