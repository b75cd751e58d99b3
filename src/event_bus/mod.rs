//! Event dispatch: the engine's callback surface.
//!
//! Executors emit typed [`Event`]s through an [`EventEmitter`]; the
//! [`EventBus`] fans them out synchronously, in emission order, to attached
//! [`EventSink`]s (stdout, JSON-lines, channels, a typed [`EventLog`]) and
//! to subscribed [`EventStream`]s. Every callback is optional on the
//! caller side: consume only the variants you need.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod sink;
pub mod streams;

pub use bus::{EventBus, EventStream};
pub use emitter::{EventEmitter, NullEmitter};
pub use event::{Event, MERGE_BRANCH_ID};
pub use sink::{ChannelSink, EventLog, EventSink, JsonLinesSink, StdOutSink};
pub use streams::{BranchStream, BranchStreamTracker};
