//! # Orchestration Events
//!
//! Outbound lifecycle notifications. The orchestrator publishes an event
//! for every significant state change; consumers (dashboards, downstream
//! pipelines) subscribe through the broadcast channel. Publishing is
//! fire-and-forget: event delivery never gates scheduling decisions.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, EventSink, PublishError};
pub use types::{OrchestratorEvent, PublishedEvent};
