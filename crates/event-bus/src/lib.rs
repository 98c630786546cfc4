//! Event & command bus
//!
//! Two independent unbounded queues: outbound execution events fanned out to
//! registered subscribers by a single dispatch task, and inbound control
//! commands polled by the execution engine between node executions.

pub mod bridge;
pub mod errors;
pub mod manager;
pub mod model;
pub mod subscriber;

pub use bridge::SyncEventManager;
pub use errors::BusError;
pub use manager::EventManager;
pub use model::{Command, CommandKind, EntityType, Event, EventStatus};
pub use subscriber::{EventRecorder, EventSubscriber, JsonLinesSubscriber, TracingSubscriber};
