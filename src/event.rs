//! Event Mapper (spec §4.1): translates domain event values to and from the
//! stored representation the event store persists and broadcasts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::error::{CqrsError, Result};

/// A domain event value. Implementors are plain data; `event_type` supplies
/// the fully qualified type tag used to round-trip through the type
/// registry, mirroring how the teacher's `EventPayload` trait names itself.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Fully qualified type tag stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Metadata filled in by the store at append time (spec §4.1).
#[derive(Clone, Debug)]
pub struct EventMetadata {
    pub event_id: u64,
    pub stream_version: u64,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An event as stored: global `event_id`, per-stream `stream_version`, type
/// tag, and opaque JSON payload (spec §3 `RecordedEvent`).
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub event_id: u64,
    pub stream_id: Uuid,
    pub stream_version: u64,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl RecordedEvent {
    /// Decodes the payload as a concrete domain event type, failing with
    /// `PayloadSerialization` if the JSON shape doesn't match.
    pub fn decode<E: DomainEvent>(&self) -> Result<E> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            event_id: self.event_id,
            stream_version: self.stream_version,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            created_at: self.created_at,
        }
    }
}

/// A domain event paired with the stream it belongs to, produced by a
/// command handler and not yet assigned `event_id`/`stream_version` — this
/// is the shape of `pending_events` (spec §3).
#[derive(Clone, Debug)]
pub struct PendingEvent {
    pub event_type: &'static str,
    pub payload: serde_json::Value,
}

impl PendingEvent {
    pub fn new<E: DomainEvent>(event: &E) -> Result<Self> {
        Ok(Self {
            event_type: event.event_type(),
            payload: serde_json::to_value(event)?,
        })
    }
}

type Decoder = Arc<dyn Fn(&serde_json::Value) -> Result<()> + Send + Sync>;

/// Maps type tags to a validation/decode function, so a subscriber can
/// reject a `RecordedEvent` whose tag it doesn't recognize before a handler
/// ever sees it (`UnknownEventType`, spec §4.1 and §7).
///
/// Built programmatically via `register`, never via a derive or macro —
/// registration DSLs are out of scope for this crate.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type tag so `validate` will accept it. The closure only
    /// needs to confirm the payload parses as `E`; callers decode via
    /// `RecordedEvent::decode` once they know the concrete type.
    pub fn register<E: DomainEvent>(mut self, event_type: &'static str) -> Self {
        self.decoders.insert(
            event_type,
            Arc::new(|payload| {
                serde_json::from_value::<E>(payload.clone())?;
                Ok(())
            }),
        );
        self
    }

    pub fn validate(&self, recorded: &RecordedEvent) -> Result<()> {
        match self.decoders.get(recorded.event_type.as_str()) {
            Some(decode) => decode(&recorded.payload),
            None => Err(CqrsError::UnknownEventType(recorded.event_type.clone())),
        }
    }
}
