//! Incremental frame decoder
//!
//! Reads the inspection copy of a response body line by line and pulls the
//! model's answer text out of OpenAI-compatible completion frames. Two line
//! shapes are recognised:
//!
//! - a bare JSON object: `{"choices":[{"delta":{"content":"hi"}}]}`
//! - an SSE data event: `data: {"choices":[{"delta":{"content":"hi"}}]}`
//!
//! Everything else (comments, keep-alives, `data: [DONE]`, error bodies, JSON
//! split over several lines) is skipped without complaint. Decoding is best
//! effort: a line that does not parse is simply not observed.
//!
//! Payloads are decoded leniently. Invalid UTF-8 and unpaired surrogate
//! escapes, which servers produce when a token boundary splits a character,
//! become U+FFFD instead of costing the whole frame.

use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::observe::{ObservationSink, RelayOutcome};
use crate::relay::InspectView;
use crate::routes::metrics::record_fragments;
use crate::streaming::LineBuffer;

/// SSE data prefix stripped before JSON parsing
const SSE_DATA_PREFIX: &[u8] = b"data: ";

/// Text holder shared by `delta` and `message`
#[derive(Debug, Default, Deserialize)]
struct ContentField {
    #[serde(default)]
    content: Option<String>,
}

/// One entry of `choices`
#[derive(Debug, Default, Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: Option<ContentField>,
    #[serde(default)]
    message: Option<ContentField>,
}

/// Completion frame, streamed chunk or full response
#[derive(Debug, Default, Deserialize)]
struct CompletionFrame {
    #[serde(default)]
    choices: Vec<FrameChoice>,
}

/// Full non-streaming response; only `message` is consulted
#[derive(Debug, Default, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<BodyChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct BodyChoice {
    #[serde(default)]
    message: Option<ContentField>,
}

/// Return the JSON payload of a line, if the line can carry a frame
fn frame_payload(line: &[u8]) -> Option<&[u8]> {
    if line.first() == Some(&b'{') {
        return Some(line);
    }

    match line.strip_prefix(SSE_DATA_PREFIX) {
        Some(rest) if rest.first() == Some(&b'{') => Some(rest),
        _ => None,
    }
}

/// Payload text with invalid UTF-8 and lone surrogate escapes replaced
fn lenient_json(payload: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(payload);
    match replace_lone_surrogates(&text) {
        Some(fixed) => Cow::Owned(fixed),
        None => text,
    }
}

/// Rewrite `\uD800`-`\uDFFF` escapes that are not part of a valid pair to
/// `\ufffd`. Returns `None` when nothing needed rewriting.
fn replace_lone_surrogates(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) != Some(&b'u') {
            // Any other escape, including an escaped backslash
            i += 2;
            continue;
        }
        let Some(unit) = hex_unit(bytes, i + 2) else {
            i += 2;
            continue;
        };

        if (0xD800..0xDC00).contains(&unit) {
            let paired = bytes.get(i + 6) == Some(&b'\\')
                && bytes.get(i + 7) == Some(&b'u')
                && hex_unit(bytes, i + 8).is_some_and(|low| (0xDC00..0xE000).contains(&low));
            if paired {
                i += 12;
                continue;
            }
        } else if !(0xDC00..0xE000).contains(&unit) {
            i += 6;
            continue;
        }

        let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
        buf.push_str(&text[copied..i]);
        buf.push_str("\\ufffd");
        i += 6;
        copied = i;
    }

    out.map(|mut buf| {
        buf.push_str(&text[copied..]);
        buf
    })
}

/// Four hex digits at `at`, as a UTF-16 code unit
fn hex_unit(bytes: &[u8], at: usize) -> Option<u16> {
    let digits = std::str::from_utf8(bytes.get(at..at + 4)?).ok()?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Extract the answer fragment carried by one line.
///
/// `choices[0].delta.content` wins over `choices[0].message.content`; empty
/// strings count as absent.
pub fn extract_fragment(line: &[u8]) -> Option<String> {
    let payload = frame_payload(line)?;
    let frame: CompletionFrame = serde_json::from_str(&lenient_json(payload)).ok()?;
    let choice = frame.choices.into_iter().next()?;

    let delta = choice
        .delta
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty());

    delta.or_else(|| {
        choice
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
    })
}

/// Answer text to observe for a fully buffered response body.
///
/// A recognised completion yields `choices[0].message.content`; any other
/// body is observed verbatim.
pub fn answer_for_body(body: &[u8]) -> String {
    match serde_json::from_str::<CompletionBody>(&lenient_json(body)) {
        Ok(parsed) if !parsed.choices.is_empty() => parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default(),
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Counters reported when a decoder finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    /// Non-empty lines inspected
    pub lines: usize,
    /// Fragments written to the sink
    pub fragments: usize,
}

/// Line-oriented decoder writing fragments straight to a sink
pub struct FrameDecoder {
    lines: LineBuffer,
    sink: Arc<dyn ObservationSink>,
    trace_id: String,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a decoder for one response
    pub fn new(sink: Arc<dyn ObservationSink>, trace_id: impl Into<String>) -> Self {
        Self {
            lines: LineBuffer::new(),
            sink,
            trace_id: trace_id.into(),
            stats: DecoderStats::default(),
        }
    }

    /// Feed one chunk of the inspection stream
    pub fn feed(&mut self, chunk: &[u8]) {
        for line in self.lines.feed(chunk) {
            self.handle_line(&line);
        }
    }

    /// Flush the trailing unterminated line and return the counters
    pub fn finish(mut self) -> DecoderStats {
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line);
        }
        self.stats
    }

    fn handle_line(&mut self, line: &[u8]) {
        if line.is_empty() {
            return;
        }
        self.stats.lines += 1;

        if let Some(fragment) = extract_fragment(line) {
            self.stats.fragments += 1;
            self.sink.fragment(&self.trace_id, &fragment);
        }
    }
}

/// Drain an inspection queue until it closes, decoding as chunks arrive
pub async fn run_decoder(
    inspect: InspectView,
    sink: Arc<dyn ObservationSink>,
    trace_id: String,
) -> DecoderStats {
    let InspectView {
        mut chunks,
        outcome,
    } = inspect;
    sink.begin(&trace_id);

    let mut decoder = FrameDecoder::new(sink.clone(), trace_id.clone());
    while let Some(chunk) = chunks.recv().await {
        decoder.feed(&chunk);
    }
    let stats = decoder.finish();

    // The relay reports right after closing the queue
    let outcome = outcome.await.unwrap_or(RelayOutcome::ClientDisconnected);
    sink.end(&trace_id, outcome);
    record_fragments(stats.fragments as u64);

    debug!(
        trace_id = %trace_id,
        lines = stats.lines,
        fragments = stats.fragments,
        outcome = %outcome,
        "Frame decoder finished"
    );

    stats
}

/// Run the decoder as its own task so it never sits on the forwarding path
pub fn spawn_decoder(
    inspect: InspectView,
    sink: Arc<dyn ObservationSink>,
    trace_id: String,
) -> JoinHandle<DecoderStats> {
    tokio::spawn(run_decoder(inspect, sink, trace_id))
}
