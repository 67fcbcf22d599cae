//! Aggregate data model and the command handler contract (spec §3, §4.3,
//! §6). The actor that serializes command execution against this state
//! lives in [`actor`].

pub mod actor;

use uuid::Uuid;

use crate::command::Command;
use crate::error::Result;
use crate::event::DomainEvent;

/// A user-defined aggregate's domain state and lifecycle (spec §4.3).
///
/// `new`/`load` mirror the two recovery paths the actor takes on init:
/// `new` for a fresh stream (`StreamNotFound`), `load` for a replay of
/// existing history. `apply` is a total function over the event's tag —
/// dispatch on the event-type, never fallible, since it only replays
/// already-validated facts (spec §9 "Polymorphism over event types").
pub trait Aggregate: Clone + Send + Sync + 'static {
    type Event: DomainEvent;

    /// Constructs an empty aggregate for a brand new stream.
    fn new(uuid: Uuid) -> Self;

    /// Replays history onto a fresh aggregate. The default folds `events`
    /// onto `Self::new(uuid)` via `apply`; override only if initialization
    /// needs information beyond a plain fold (e.g. denormalized caches).
    fn load(uuid: Uuid, events: &[Self::Event]) -> Self {
        let mut state = Self::new(uuid);
        for event in events {
            state.apply(event);
        }
        state
    }

    fn apply(&mut self, event: &Self::Event);
}

/// `(uuid, version, pending_events, domain_state)` from spec §3. `version`
/// equals the number of events applied from the store; `pending_events` is
/// empty whenever the actor is idle and not mid-command — the actor clears
/// it immediately after a successful append or discards it on failure.
#[derive(Clone, Debug)]
pub struct AggregateState<A: Aggregate> {
    pub uuid: Uuid,
    pub version: u64,
    pub pending_events: Vec<A::Event>,
    pub domain_state: A,
}

/// The command handler contract (spec §6): pure with respect to external
/// state. All mutation is expressed as the returned events; the handler has
/// no store handle to call, so the purity contract is enforced by
/// construction, not merely by convention.
#[async_trait::async_trait]
pub trait CommandHandler<A, C>: Send + Sync + 'static
where
    A: Aggregate,
    C: Command,
{
    async fn handle(&self, domain_state: &A, command: &C) -> Result<Vec<A::Event>>;
}
