//! Streaming relay integration tests
//!
//! The client must receive the upstream body byte-for-byte while the sink
//! receives the answer fragments in order.

use std::future::IntoFuture;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{bodies, ProxyHarness};

#[tokio::test]
async fn test_sse_stream_relayed_and_observed() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bodies::SSE_HELLO, "text/event-stream"),
        )
        .mount(&harness.upstream)
        .await;

    let response = harness
        .server
        .post("/v1/chat/completions")
        .json(&json!({"model": "llama3", "stream": true, "messages": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().as_ref(), bodies::SSE_HELLO.as_bytes());

    harness.sink.wait_for_end(1).await;
    assert_eq!(
        harness.sink.events(),
        vec!["begin", "fragment:Hel", "fragment:lo", "end:completed"]
    );
}

#[tokio::test]
async fn test_openai_stream_noise_ignored() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bodies::SSE_OPENAI, "text/event-stream"),
        )
        .mount(&harness.upstream)
        .await;

    let response = harness
        .server
        .post("/v1/chat/completions")
        .json(&json!({"model": "gpt-4o", "stream": true, "messages": []}))
        .await;

    assert_eq!(response.text(), bodies::SSE_OPENAI);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    harness.sink.wait_for_end(1).await;
    assert_eq!(harness.sink.fragments(), vec!["Hello", "!"]);
}

#[tokio::test]
async fn test_json_lines_stream_observed() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bodies::JSON_LINES, "application/x-ndjson"),
        )
        .mount(&harness.upstream)
        .await;

    let response = harness.server.post("/api/chat").text("{}").await;

    assert_eq!(response.text(), bodies::JSON_LINES);

    harness.sink.wait_for_end(1).await;
    assert_eq!(harness.sink.fragments(), vec!["The", " answer"]);
}

#[tokio::test]
async fn test_concurrent_requests_observed_independently() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bodies::SSE_HELLO, "text/event-stream"),
        )
        .mount(&harness.upstream)
        .await;

    let first = harness.server.post("/v1/chat/completions").text("{}");
    let second = harness.server.post("/v1/chat/completions").text("{}");
    let (first, second) = tokio::join!(first.into_future(), second.into_future());

    assert_eq!(first.text(), bodies::SSE_HELLO);
    assert_eq!(second.text(), bodies::SSE_HELLO);

    harness.sink.wait_for_end(2).await;
    let events = harness.sink.events();
    assert_eq!(events.iter().filter(|e| *e == "begin").count(), 2);
    assert_eq!(harness.sink.fragments().len(), 4);
}
