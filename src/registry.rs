//! Aggregate Registry (spec §4.2): locates or spawns the singleton actor
//! for a given `(aggregate_module, uuid)`. Guarantees at-most-one live actor
//! per id within the process.
//!
//! Implemented as a `tokio::sync::Mutex`-guarded map rather than a separate
//! registry actor task — spec §5 explicitly allows either "one registry
//! actor, or a lock-free map with compare-and-swap on insert", and a
//! mutex-guarded `HashMap::entry` gives the same single-writer guarantee
//! without the extra task and channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::aggregate::actor::{self, AggregateHandle};
use crate::aggregate::Aggregate;
use crate::store::EventStore;

/// Owns the singleton actors for one aggregate type `A` backed by store
/// `ES`. Cloning an `AggregateRegistry` shares the same underlying map —
/// every clone sees the same live actors.
pub struct AggregateRegistry<A: Aggregate, ES: EventStore> {
    store: Arc<ES>,
    actors: Arc<Mutex<HashMap<Uuid, AggregateHandle<A>>>>,
}

impl<A: Aggregate, ES: EventStore> Clone for AggregateRegistry<A, ES> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            actors: self.actors.clone(),
        }
    }
}

impl<A: Aggregate, ES: EventStore> AggregateRegistry<A, ES> {
    pub fn new(store: Arc<ES>) -> Self {
        Self {
            store,
            actors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the actor for `uuid`, spawning one on first request or after
    /// a crash. Concurrent callers serialize on the internal mutex only for
    /// the instant it takes to look up or insert a handle — never for the
    /// lifetime of a command execution.
    pub async fn get_or_start(&self, uuid: Uuid) -> AggregateHandle<A> {
        let mut actors = self.actors.lock().await;

        if let Some(handle) = actors.get(&uuid) {
            if handle.is_alive() {
                return handle.clone();
            }
            debug!(aggregate_uuid = %uuid, "respawning crashed aggregate actor");
        }

        let handle = actor::spawn::<A, ES>(uuid, self.store.clone());
        actors.insert(uuid, handle.clone());
        handle
    }
}
