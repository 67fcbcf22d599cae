//! # cqrs_runtime_core
//!
//! Core command dispatch, aggregate actor, and event-reaction runtime for
//! CQRS/event-sourced domain systems.
//!
//! - [`command`] / [`aggregate`]: the command and aggregate data model, and
//!   the actor that serializes command execution against one aggregate.
//! - [`registry`]: locates or spawns an aggregate's singleton actor.
//! - [`dispatcher`]: the routing table from command type to aggregate and
//!   handler, with a middleware chain wrapping every dispatch.
//! - [`event_handler`] / [`process_manager`]: the event-reaction runtime —
//!   ordered event subscriptions and saga-style process managers.
//! - [`store`]: the `EventStore`/`SnapshotStore`/`CheckpointStore` contracts
//!   this crate treats as external collaborators, plus in-memory reference
//!   implementations for tests and demos.
//! - [`error`]: the crate's error taxonomy.

pub mod aggregate;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod event_handler;
pub mod middleware;
pub mod process_manager;
pub mod registry;
pub mod store;

pub use aggregate::{Aggregate, AggregateState, CommandHandler};
pub use command::{AnyCommand, Command};
pub use dispatcher::{CommandDispatcher, Router, RouterBuilder};
pub use error::{CqrsError, Result};
pub use event::{DomainEvent, EventMetadata, PendingEvent, RecordedEvent, TypeRegistry};
pub use event_handler::{EventHandler, EventHandlerTask};
pub use middleware::{DispatchMiddleware, Next};
pub use process_manager::{Interest, ProcessManagerModule};
pub use registry::AggregateRegistry;
pub use store::{CheckpointStore, EventBatch, EventStore, Snapshot, SnapshotStore};
pub use uuid::Uuid;
