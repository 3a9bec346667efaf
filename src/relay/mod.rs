//! Dual-sink relay
//!
//! Splits an upstream response body into a forward view, pulled by the client
//! connection, and an inspect view, consumed by the frame decoder task. The
//! forward view is the only reader of the upstream body: every chunk it reads
//! is queued for inspection and then handed to the client unchanged.
//!
//! The inspect queue is bounded. When it is full the forward view waits for
//! the decoder, which keeps memory flat at the cost of tying the client's pace
//! to line scanning speed.

use std::fmt::Display;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    config::RelayMode,
    decoder::{answer_for_body, spawn_decoder, DecoderStats},
    error::{AppError, AppResult},
    observe::{ObservationSink, RelayOutcome},
    proxy::RequestContext,
    routes::metrics::{record_relayed_bytes, record_upstream_error},
};

/// Inspection side of a tee
pub struct InspectView {
    /// Body chunks in forward order; closes when the forward view ends
    pub chunks: mpsc::Receiver<Bytes>,
    /// How the forward view ended; resolves once it is dropped
    pub outcome: oneshot::Receiver<RelayOutcome>,
}

/// Tracks the forward view and logs its fate exactly once, on drop.
///
/// The guard owns the inspect sender, so the inspect queue closes when the
/// guard goes, and it is built before the forward stream is first polled so a
/// body the server never reads is still accounted for.
struct RelayGuard {
    ctx: RequestContext,
    declared_len: Option<u64>,
    chunks: usize,
    bytes: u64,
    outcome: Option<RelayOutcome>,
    inspect: Option<mpsc::Sender<Bytes>>,
    report: Option<oneshot::Sender<RelayOutcome>>,
}

impl RelayGuard {
    fn new(
        ctx: RequestContext,
        declared_len: Option<u64>,
        inspect: mpsc::Sender<Bytes>,
        report: oneshot::Sender<RelayOutcome>,
    ) -> Self {
        let mut guard = Self {
            ctx,
            declared_len,
            chunks: 0,
            bytes: 0,
            outcome: None,
            inspect: Some(inspect),
            report: Some(report),
        };
        guard.check_declared_len();
        guard
    }

    /// Count a chunk and queue it for inspection
    async fn record_chunk(&mut self, chunk: &Bytes) {
        self.chunks += 1;
        self.bytes += chunk.len() as u64;

        if let Some(tx) = self.inspect.as_ref() {
            if tx.send(chunk.clone()).await.is_err() {
                self.inspect = None;
            }
        }

        self.check_declared_len();
    }

    /// A server writing a fixed-length body stops polling once the declared
    /// length is reached, so that point counts as completion.
    fn check_declared_len(&mut self) {
        if self.declared_len.is_some_and(|len| self.bytes >= len) {
            self.complete();
        }
    }

    fn upstream_failed(&mut self, error: &dyn Display) {
        self.outcome = Some(RelayOutcome::UpstreamFailed);
        self.ctx.log_stream_error(&error.to_string(), self.bytes);
        record_upstream_error("body");
    }

    fn complete(&mut self) {
        if self.outcome.is_none() {
            self.outcome = Some(RelayOutcome::Completed);
        }
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or(RelayOutcome::ClientDisconnected);
        match outcome {
            RelayOutcome::Completed => self.ctx.log_stream_ended(self.chunks, self.bytes),
            RelayOutcome::ClientDisconnected => {
                self.ctx.log_client_disconnected(self.chunks, self.bytes)
            }
            RelayOutcome::UpstreamFailed => {}
        }
        record_relayed_bytes(self.bytes);

        // Close the queue before reporting so the decoder drains it first
        self.inspect = None;
        if let Some(report) = self.report.take() {
            let _ = report.send(outcome);
        }
    }
}

/// Split `source` into a forward stream and an inspect view.
///
/// The forward stream yields exactly the items of `source`, in order, and
/// stops after the first error. Each chunk is queued for inspection before it
/// is yielded; if the receiver has been dropped, forwarding carries on alone.
/// The queue closes when the forward stream finishes or is dropped, polled or
/// not. `declared_len` is the body length the client connection will write,
/// when known; reaching it marks the relay completed.
pub fn tee<S, E>(
    source: S,
    capacity: usize,
    declared_len: Option<u64>,
    ctx: RequestContext,
) -> (impl Stream<Item = Result<Bytes, E>> + Send + 'static, InspectView)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (sender, chunks) = mpsc::channel(capacity.max(1));
    let (report, outcome) = oneshot::channel();
    let mut guard = RelayGuard::new(ctx, declared_len, sender, report);

    let forward = async_stream::stream! {
        futures::pin_mut!(source);

        while let Some(item) = source.next().await {
            match item {
                Ok(bytes) => {
                    guard.record_chunk(&bytes).await;
                    yield Ok(bytes);
                }
                Err(e) => {
                    guard.upstream_failed(&e);
                    yield Err(e);
                    break;
                }
            }
        }

        guard.complete();
    };

    (forward, InspectView { chunks, outcome })
}

/// Number of body bytes the client connection will write for a response.
///
/// Bodiless responses count as zero; otherwise the declared `Content-Length`
/// is used when present and valid.
pub fn declared_body_len(method: &Method, status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Some(0);
    }

    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Client body plus the decoder task watching the same bytes
pub struct RelayedBody {
    /// Body to hand to the client connection
    pub body: Body,
    /// Decoder task; finishes once the forward view is done or dropped
    pub decoder: JoinHandle<DecoderStats>,
}

/// Streaming relay that feeds an observation sink
#[derive(Clone)]
pub struct DualSinkRelay {
    sink: Arc<dyn ObservationSink>,
    inspect_capacity: usize,
}

impl DualSinkRelay {
    /// Create a relay writing extracted text to `sink`
    pub fn new(sink: Arc<dyn ObservationSink>, inspect_capacity: usize) -> Self {
        Self {
            sink,
            inspect_capacity,
        }
    }

    /// Start relaying `source`: spawn the decoder and return the client body.
    ///
    /// `declared_len` is the length the client connection will write, see
    /// [`declared_body_len`].
    pub fn start<S, E>(
        &self,
        source: S,
        declared_len: Option<u64>,
        ctx: &RequestContext,
    ) -> RelayedBody
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<axum::BoxError> + Display + Send + 'static,
    {
        let (forward, inspect) = tee(source, self.inspect_capacity, declared_len, ctx.clone());
        let decoder = spawn_decoder(inspect, self.sink.clone(), ctx.trace_id.clone());

        RelayedBody {
            body: Body::from_stream(forward),
            decoder,
        }
    }

    /// Read a complete upstream body, observe its answer, and return the bytes
    pub async fn relay_buffered(
        &self,
        response: reqwest::Response,
        ctx: &RequestContext,
    ) -> AppResult<Bytes> {
        let body = response.bytes().await.map_err(|e| {
            ctx.log_stream_error(&e.to_string(), 0);
            record_upstream_error("body");
            AppError::UpstreamError(e.to_string())
        })?;

        self.observe_buffered(&body, &ctx.trace_id);
        record_relayed_bytes(body.len() as u64);
        ctx.log_stream_ended(1, body.len() as u64);

        Ok(body)
    }

    fn observe_buffered(&self, body: &[u8], trace_id: &str) {
        self.sink.begin(trace_id);
        let answer = answer_for_body(body);
        if !answer.is_empty() {
            self.sink.fragment(trace_id, &answer);
        }
        self.sink.end(trace_id, RelayOutcome::Completed);
    }
}

/// Whether a response should take the buffered path under `mode`.
///
/// Only bodies with a declared length that are not event or line streams
/// qualify; everything else is streamed.
pub fn should_buffer(mode: RelayMode, headers: &HeaderMap) -> bool {
    if mode != RelayMode::Auto || !headers.contains_key(header::CONTENT_LENGTH) {
        return false;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    !(content_type.starts_with("text/event-stream")
        || content_type.starts_with("application/x-ndjson")
        || content_type.starts_with("application/jsonl"))
}
