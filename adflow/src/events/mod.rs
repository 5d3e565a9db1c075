//! Pipeline lifecycle events and sinks.

mod sink;

pub use sink::{CollectingEventSink, EventSink, EventType, LoggingEventSink, NoOpEventSink, PipelineEvent};
