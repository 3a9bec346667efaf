//! Request forwarding integration tests
//!
//! Covers what the upstream sees (method, path, query, headers, body) and how
//! upstream status codes and transport failures reach the client.

use std::net::TcpListener;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use llm_proxy::Config;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{bodies, server_for, ProxyHarness, RecordingSink};

#[tokio::test]
async fn test_request_forwarded_with_host_rewritten() {
    let harness = ProxyHarness::new().await;
    let request_body = json!({"model": "llama3", "messages": [{"role": "user", "content": "hi"}]});

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(query_param("trace", "1"))
        .and(header("host", harness.upstream_authority().as_str()))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_json(&request_body))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bodies::COMPLETION, "application/json"),
        )
        .expect(1)
        .mount(&harness.upstream)
        .await;

    let response = harness
        .server
        .post("/v1/chat/completions?trace=1")
        .add_header(
            HeaderName::from_static("host"),
            HeaderValue::from_static("proxy.local:8080"),
        )
        .add_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("Bearer sk-test"),
        )
        .json(&request_body)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), bodies::COMPLETION);
}

#[tokio::test]
async fn test_any_method_is_forwarded() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("DELETE"))
        .and(path("/api/delete"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&harness.upstream)
        .await;

    let response = harness.server.delete("/api/delete").await;

    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_empty_post_keeps_content_length() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("POST"))
        .and(path("/api/unload"))
        .and(header("content-length", "0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.upstream)
        .await;

    let response = harness
        .server
        .post("/api/unload")
        .add_header(
            HeaderName::from_static("content-length"),
            HeaderValue::from_static("0"),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_large_request_body_streamed_upstream() {
    let harness = ProxyHarness::new().await;
    let prompt = "lorem ipsum ".repeat(50_000);
    let request_body = json!({"model": "llama3", "messages": [{"role": "user", "content": prompt}]});

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(&request_body))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bodies::COMPLETION, "application/json"),
        )
        .expect(1)
        .mount(&harness.upstream)
        .await;

    let response = harness
        .server
        .post("/v1/chat/completions")
        .json(&request_body)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), bodies::COMPLETION);
}

#[tokio::test]
async fn test_response_headers_copied_with_duplicates() {
    let harness = ProxyHarness::new().await;

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("x-request-id", "abc123")
                .append_header("set-cookie", "a=1")
                .append_header("set-cookie", "b=2")
                .set_body_raw(r#"{"object":"list","data":[]}"#, "application/json"),
        )
        .mount(&harness.upstream)
        .await;

    let response = harness.server.get("/v1/models").await;

    let headers = response.headers();
    assert_eq!(headers.get("x-request-id").unwrap(), "abc123");
    let cookies: Vec<_> = headers.get_all("set-cookie").iter().collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
}

#[tokio::test]
async fn test_upstream_error_status_relayed_unchanged() {
    let harness = ProxyHarness::new().await;
    let error_body = r#"{"error":{"message":"model 'nope' not found","type":"invalid_request_error"}}"#;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_raw(error_body, "application/json"))
        .mount(&harness.upstream)
        .await;

    let response = harness.server.post("/v1/chat/completions").text("{}").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.text(), error_body);

    harness.sink.wait_for_end(1).await;
    assert!(harness.sink.fragments().is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream_returns_bad_gateway() {
    // Reserve a port, then free it so nothing is listening there
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let sink = Arc::new(RecordingSink::default());
    let server = server_for(Config::new(format!("http://127.0.0.1:{}", port)), sink.clone());

    let response = server.post("/v1/chat/completions").text("{}").await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Error forwarding request"));

    // No relay was constructed, so nothing was observed
    assert!(sink.events().is_empty());
}
