//! Observation sinks
//!
//! Destinations for answer text extracted from relayed responses. A sink sees
//! one `begin`, any number of `fragment` calls in arrival order, then one
//! `end` per relayed response. Sinks must not buffer fragments.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::ObserveTarget;

/// How a relayed response ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Every byte of the body reached the client connection
    Completed,
    /// The client went away before the body was delivered
    ClientDisconnected,
    /// Reading the upstream body failed
    UpstreamFailed,
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::ClientDisconnected => "client_disconnected",
            RelayOutcome::UpstreamFailed => "upstream_failed",
        }
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of extracted answer text
pub trait ObservationSink: Send + Sync {
    /// A response started relaying
    fn begin(&self, trace_id: &str);

    /// A fragment of answer text was decoded
    fn fragment(&self, trace_id: &str, text: &str);

    /// The response finished relaying
    fn end(&self, trace_id: &str, outcome: RelayOutcome);
}

/// Build the sink selected by configuration
pub fn sink_for(target: ObserveTarget) -> Arc<dyn ObservationSink> {
    match target {
        ObserveTarget::Stdout => Arc::new(StdoutSink::new()),
        ObserveTarget::Log => Arc::new(LogSink),
    }
}

/// Prints fragments to standard output as they arrive, flushing each one so
/// the answer appears to type itself out.
///
/// Writes happen on a dedicated thread; decoder tasks only enqueue text and
/// never wait on a slow terminal or pipe.
#[derive(Debug, Clone)]
pub struct StdoutSink {
    tx: mpsc::UnboundedSender<String>,
}

impl StdoutSink {
    /// Sink writing to the process's standard output
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }

    /// Sink writing to an arbitrary writer
    pub fn with_writer<W>(mut writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        std::thread::spawn(move || {
            while let Some(text) = rx.blocking_recv() {
                // Output is best effort; a closed stdout must not affect the relay
                let _ = writer.write_all(text.as_bytes());
                let _ = writer.flush();
            }
        });

        Self { tx }
    }

    fn write(&self, text: &str) {
        let _ = self.tx.send(text.to_string());
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationSink for StdoutSink {
    fn begin(&self, _trace_id: &str) {
        self.write("- - -\n");
    }

    fn fragment(&self, _trace_id: &str, text: &str) {
        self.write(text);
    }

    fn end(&self, _trace_id: &str, _outcome: RelayOutcome) {
        self.write("\n\n");
    }
}

/// Emits each fragment as a tracing event tagged with the request's trace id
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ObservationSink for LogSink {
    fn begin(&self, trace_id: &str) {
        info!(trace_id = %trace_id, "Answer started");
    }

    fn fragment(&self, trace_id: &str, text: &str) {
        info!(trace_id = %trace_id, fragment = %text, "Answer fragment");
    }

    fn end(&self, trace_id: &str, outcome: RelayOutcome) {
        info!(trace_id = %trace_id, outcome = %outcome, "Answer ended");
    }
}
