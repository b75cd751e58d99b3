//! Synchronous, in-order event dispatch.
//!
//! The engine runs one cooperative loop per execution and guarantees the
//! documented callback order, so events are fanned out inline at the point
//! of emission: first to every attached sink, then to every live
//! subscriber channel. There are no worker tasks and no broadcast buffer
//! to lag behind; what an observer sees is exactly the emission order. The
//! trade-off is deliberate: a slow sink slows the engine instead of
//! silently dropping events, and sinks that do real I/O should hand off to
//! their own channel (see [`ChannelSink`](super::sink::ChannelSink)).
//!
//! ```text
//! Executors
//!     │ ctx.emit()
//!     ▼
//! EventBus ──► sinks (stdout, JSONL, channel, log), in order
//!     │
//!     └──────► subscriber streams (flume)
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::emitter::EventEmitter;
use super::event::Event;
use super::sink::{EventSink, StdOutSink};

struct BusCore {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    subscribers: Mutex<Vec<flume::Sender<Event>>>,
}

impl BusCore {
    fn dispatch(&self, event: Event) {
        for sink in self.sinks.read().iter() {
            if let Err(err) = sink.handle(&event) {
                tracing::warn!(sink = sink.name(), %err, "event sink error");
            }
        }
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        // Send to every live stream; prune the ones whose receiver is gone.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Fan-out point for execution events.
///
/// One bus typically serves one execution (per-request isolation in
/// servers), but nothing prevents sharing a bus across sequential runs.
/// Sinks observe events from the moment they are attached; subscriber
/// streams from the moment they are created.
pub struct EventBus {
    core: Arc<BusCore>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink)
    }
}

impl EventBus {
    /// Bus with a single sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Arc::new(sink)])
    }

    /// Bus with the given sinks, dispatched to in order.
    #[must_use]
    pub fn with_sinks(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            core: Arc::new(BusCore {
                sinks: RwLock::new(sinks),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Bus with no sinks; consume events through [`subscribe`](Self::subscribe).
    #[must_use]
    pub fn sinkless() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Attach another sink; it observes events from this point on.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.core.sinks.write().push(Arc::new(sink));
    }

    /// Publish one event directly.
    pub fn emit(&self, event: Event) {
        self.core.dispatch(event);
    }

    /// The emitter handed to executors.
    pub fn emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(BusEmitter {
            core: Arc::clone(&self.core),
        })
    }

    /// Open a stream that yields every event emitted after this call.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = flume::unbounded();
        self.core.subscribers.lock().push(tx);
        EventStream { rx }
    }
}

/// Cloneable emitter handle over the bus core.
#[derive(Clone)]
struct BusEmitter {
    core: Arc<BusCore>,
}

impl std::fmt::Debug for BusEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BusEmitter")
    }
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: Event) {
        self.core.dispatch(event);
    }
}

/// Subscription handle yielding events in emission order.
///
/// The stream ends once the bus (and with it the sending side) is dropped.
pub struct EventStream {
    rx: flume::Receiver<Event>,
}

impl EventStream {
    /// Wait for the next event; `None` once the bus is gone and the buffer
    /// is empty.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv_async().await.ok()
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }

    /// Wait for the next event up to `duration`.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<Event> {
        tokio::time::timeout(duration, self.rx.recv_async())
            .await
            .ok()
            .and_then(Result::ok)
    }
}
