//! Output targets for execution events.
//!
//! Sinks are dispatched to synchronously and in order, so `handle` takes
//! `&self` and implementations own whatever interior mutability they need.
//! A sink that does slow I/O should forward through a [`ChannelSink`] and
//! drain on its own task instead of blocking the engine.

use std::fs::File;
use std::io::{self, Result as IoResult, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::Event;
use crate::errors::NodeErrorPayload;

/// An output target consuming full [`Event`] objects.
pub trait EventSink: Send + Sync {
    /// Handle one event. Errors are logged by the bus and never propagate
    /// into the execution.
    fn handle(&self, event: &Event) -> IoResult<()>;

    /// A short identifier used when logging sink failures.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Renders events through their `Display` form onto stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdOutSink;

impl EventSink for StdOutSink {
    fn handle(&self, event: &Event) -> IoResult<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{event}")?;
        out.flush()
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// JSON Lines sink for machine-readable structured logging.
///
/// One JSON object per line, suitable for log aggregation, stream
/// processing, and automated assertions.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    /// Wrap a custom writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Write JSON lines to stdout.
    #[must_use]
    pub fn to_stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write JSON lines to a file (created or truncated).
    pub fn to_file(path: impl AsRef<Path>) -> IoResult<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl EventSink for JsonLinesSink {
    fn handle(&self, event: &Event) -> IoResult<()> {
        let json = event
            .to_json_string()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{json}")?;
        writer.flush()
    }

    fn name(&self) -> &str {
        "json-lines"
    }
}

/// Forwards events to a flume channel for async consumers: SSE or
/// WebSocket bridges, live dashboards, centralized logging.
pub struct ChannelSink {
    tx: flume::Sender<Event>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&self, event: &Event) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Capturing sink with typed accessors over the execution's event stream.
///
/// Clones share the underlying buffer: attach one clone to the bus, keep
/// the other to inspect after (or during) the run. Intended for tests and
/// post-hoc inspection; accessors answer the questions the event protocol
/// is usually interrogated for rather than handing back raw variants.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every captured event, in emission order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Node ids of all `NodeFinish` events, in completion order.
    #[must_use]
    pub fn finished_nodes(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::NodeFinish { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// All token deltas for one node, concatenated.
    #[must_use]
    pub fn tokens_for(&self, node: &str) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Token { node_id, delta } if node_id == node => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All terminal-node token deltas, concatenated.
    #[must_use]
    pub fn workflow_tokens(&self) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::WorkflowToken { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The `(success, final_output)` of the completion event, if the run
    /// finished.
    #[must_use]
    pub fn completion(&self) -> Option<(bool, String)> {
        self.events.lock().iter().find_map(|e| match e {
            Event::Complete {
                success,
                final_output,
                ..
            } => Some((*success, final_output.clone())),
            _ => None,
        })
    }

    /// Every structured node-error payload, in emission order.
    #[must_use]
    pub fn node_errors(&self) -> Vec<NodeErrorPayload> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::NodeError { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(router_node, route_id)` pairs in selection order.
    #[must_use]
    pub fn route_selections(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::RouteSelected { node_id, route_id } => {
                    Some((node_id.clone(), route_id.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Iteration numbers emitted by one while-loop node.
    #[must_use]
    pub fn loop_iterations(&self, node: &str) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::LoopIteration {
                    node_id, iteration, ..
                } if node_id == node => Some(*iteration),
                _ => None,
            })
            .collect()
    }

    /// Diagnostic messages under one scope.
    #[must_use]
    pub fn diagnostics(&self, wanted_scope: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Diagnostic { scope, message } if scope == wanted_scope => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventLog {
    fn handle(&self, event: &Event) -> IoResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "event-log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_typed_accessors() {
        let log = EventLog::new();
        log.handle(&Event::NodeFinish {
            node_id: "a".into(),
            node_type: "agent".into(),
            output: "done".into(),
            duration_ms: 1,
        })
        .unwrap();
        log.handle(&Event::Token {
            node_id: "a".into(),
            delta: "hel".into(),
        })
        .unwrap();
        log.handle(&Event::Token {
            node_id: "a".into(),
            delta: "lo".into(),
        })
        .unwrap();
        log.handle(&Event::RouteSelected {
            node_id: "r".into(),
            route_id: "x".into(),
        })
        .unwrap();
        log.handle(&Event::Complete {
            success: true,
            final_output: "hello".into(),
            error: None,
            duration_ms: 2,
        })
        .unwrap();

        assert_eq!(log.finished_nodes(), vec!["a"]);
        assert_eq!(log.tokens_for("a"), "hello");
        assert_eq!(log.tokens_for("b"), "");
        assert_eq!(log.route_selections(), vec![("r".into(), "x".into())]);
        assert_eq!(log.completion(), Some((true, "hello".into())));
        assert!(log.node_errors().is_empty());

        log.clear();
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn test_clones_share_the_buffer() {
        let log = EventLog::new();
        let writer = log.clone();
        writer.handle(&Event::diagnostic("test", "hello")).unwrap();
        assert_eq!(log.snapshot().len(), 1);
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, rx) = flume::unbounded();
        let sink = ChannelSink::new(tx);
        sink.handle(&Event::diagnostic("test", "hello")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Event::diagnostic("test", "hello"));
    }

    #[test]
    fn test_channel_sink_broken_pipe() {
        let (tx, rx) = flume::unbounded();
        drop(rx);
        let sink = ChannelSink::new(tx);
        assert!(sink.handle(&Event::diagnostic("test", "hello")).is_err());
    }
}
