//! Process Router (spec §4.6) and Process Manager Instance (spec §4.7): the
//! saga/process-manager half of the event-reaction runtime.

pub mod instance;
pub mod router;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::command::AnyCommand;
use crate::error::Result;
use crate::event::RecordedEvent;

/// The Process Router's per-event routing decision (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Ensure an instance keyed by this uuid exists, then route to it.
    Start(Uuid),
    /// Route to an existing instance; recreate from snapshot (or empty) if
    /// none exists (spec §9 pinned Open Question).
    Continue(Uuid),
    /// Route, then terminate the instance once it has acknowledged.
    Stop(Uuid),
    /// Ignore and immediately acknowledge upstream.
    Ignore,
}

/// A user-defined saga reaction driving one process manager instance's
/// state machine (spec §4.7). `State` is the instance's durable domain
/// state, snapshotted as JSON between events.
#[async_trait]
pub trait ProcessManagerModule: Send + Sync + 'static {
    type State: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// A label recorded on every snapshot this module's instances produce.
    fn source_type(&self) -> &'static str;

    /// Decides what this module wants done with `event`, independent of any
    /// single instance's state — this is why it takes `&self` rather than
    /// an instance's `State`.
    fn interested(&self, event: &RecordedEvent) -> Interest;

    /// A fresh instance's starting state, used both for a brand new
    /// instance and to recover a `{:continue, uuid}` with no prior history.
    fn empty_state(&self) -> Self::State;

    /// Folds `event` onto `state`, returning the updated state and any
    /// commands to dispatch in order (spec §4.7 steps 2-3).
    async fn handle(
        &self,
        state: &Self::State,
        event: &RecordedEvent,
    ) -> Result<(Self::State, Vec<Box<dyn AnyCommand>>)>;
}
