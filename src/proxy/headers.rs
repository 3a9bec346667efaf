//! Header copying between client and upstream
//!
//! Requests keep every client header, duplicates included and in order,
//! except Host (rewritten to the target authority) and the chunked framing
//! headers the HTTP client regenerates. `Content-Length` is kept since the
//! body is streamed through unchanged. Responses keep every upstream header except
//! hop-by-hop ones, which the server regenerates for the client connection.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::error::{AppError, AppResult};

/// Hop-by-hop headers that must never be forwarded on a response
const HOP_BY_HOP_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Request headers owned by the outbound transport
const TRANSPORT_REQUEST_HEADERS: &[HeaderName] = &[
    header::HOST,
    header::TRANSFER_ENCODING,
    header::TRAILER,
];

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name)
}

/// Build upstream request headers from the client's headers
pub fn build_upstream_headers(incoming: &HeaderMap, authority: &str) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(incoming.len());

    for (name, value) in incoming {
        if !TRANSPORT_REQUEST_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let host = HeaderValue::from_str(authority)
        .map_err(|e| AppError::BadRequest(format!("Invalid target authority: {}", e)))?;
    headers.insert(header::HOST, host);

    Ok(headers)
}

/// Filter hop-by-hop headers from a response, preserving duplicates
pub fn filter_response_headers(response_headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(response_headers.len());

    for (name, value) in response_headers {
        if !is_hop_by_hop_header(name) {
            filtered.append(name.clone(), value.clone());
        }
    }

    filtered
}
