//! The Process Router (spec §4.6): a subscription over the global event
//! log that decides, per event, which process manager instance (if any)
//! should see it, creating or tearing down instances as directed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::instance::{self, ProcessManagerHandle};
use super::{Interest, ProcessManagerModule};
use crate::dispatcher::CommandDispatcher;
use crate::error::{CqrsError, Result};
use crate::event::RecordedEvent;
use crate::store::{CheckpointStore, EventStore, SnapshotStore};

const CATCHUP_BATCH_SIZE: usize = 256;

/// A running Process Router subscription, analogous to
/// [`crate::event_handler::EventHandlerTask`].
pub struct ProcessRouterTask {
    join: JoinHandle<Result<()>>,
}

impl ProcessRouterTask {
    pub async fn join(self) -> Result<()> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(CqrsError::Other(anyhow::anyhow!(
                "process router task panicked: {err}"
            ))),
        }
    }
}

/// Spawns a Process Router named `name` wiring `module` to `store`,
/// `snapshots`, and `dispatcher`. Its own subscription cursor lives under
/// `name` in `checkpoints`, same as an Event Handler Runtime subscription.
#[allow(clippy::too_many_arguments)]
pub fn spawn<M, ES, SS, D, CS>(
    name: &'static str,
    module: Arc<M>,
    store: Arc<ES>,
    snapshots: Arc<SS>,
    dispatcher: Arc<D>,
    checkpoints: Arc<CS>,
) -> ProcessRouterTask
where
    M: ProcessManagerModule,
    ES: EventStore,
    SS: SnapshotStore,
    D: CommandDispatcher,
    CS: CheckpointStore,
{
    ProcessRouterTask {
        join: tokio::spawn(run(name, module, store, snapshots, dispatcher, checkpoints)),
    }
}

struct Instances {
    inner: HashMap<Uuid, ProcessManagerHandle>,
}

impl Instances {
    fn get_or_spawn<M, SS, D>(
        &mut self,
        uuid: Uuid,
        name: &'static str,
        module: &Arc<M>,
        snapshots: &Arc<SS>,
        dispatcher: &Arc<D>,
    ) -> ProcessManagerHandle
    where
        M: ProcessManagerModule,
        SS: SnapshotStore,
        D: CommandDispatcher,
    {
        if let Some(handle) = self.inner.get(&uuid) {
            if handle.is_alive() {
                return handle.clone();
            }
            debug!(instance_uuid = %uuid, "respawning crashed process manager instance");
        }
        let handle = instance::spawn(name, uuid, module.clone(), snapshots.clone(), dispatcher.clone());
        self.inner.insert(uuid, handle.clone());
        handle
    }
}

#[instrument(skip(module, store, snapshots, dispatcher, checkpoints), fields(process_router = name))]
async fn run<M, ES, SS, D, CS>(
    name: &'static str,
    module: Arc<M>,
    store: Arc<ES>,
    snapshots: Arc<SS>,
    dispatcher: Arc<D>,
    checkpoints: Arc<CS>,
) -> Result<()>
where
    M: ProcessManagerModule,
    ES: EventStore,
    SS: SnapshotStore,
    D: CommandDispatcher,
    CS: CheckpointStore,
{
    let mut last_seen = checkpoints.read_checkpoint(name).await?;
    let mut instances = Instances {
        inner: HashMap::new(),
    };

    // Subscribe before catching up, for the same reason the event handler
    // runtime does: anything appended mid-catch-up lands in this receiver's
    // buffer instead of being lost, and `route_one`'s `event_id <= last_seen`
    // check dedupes the overlap.
    let mut receiver = store.subscribe_all();
    catch_up(
        name, &module, &store, &snapshots, &dispatcher, &checkpoints, &mut instances, &mut last_seen,
    )
    .await?;

    loop {
        match receiver.recv().await {
            Ok(batch) => {
                for event in &batch.events {
                    route_one(
                        name, &module, &snapshots, &dispatcher, &checkpoints, &mut instances,
                        event, &mut last_seen,
                    )
                    .await?;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "process router lagged behind the broadcast, resyncing");
                catch_up(
                    name, &module, &store, &snapshots, &dispatcher, &checkpoints, &mut instances,
                    &mut last_seen,
                )
                .await?;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event store broadcast closed, process router stopping");
                return Ok(());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn catch_up<M, ES, SS, D, CS>(
    name: &'static str,
    module: &Arc<M>,
    store: &ES,
    snapshots: &Arc<SS>,
    dispatcher: &Arc<D>,
    checkpoints: &CS,
    instances: &mut Instances,
    last_seen: &mut u64,
) -> Result<()>
where
    M: ProcessManagerModule,
    ES: EventStore,
    SS: SnapshotStore,
    D: CommandDispatcher,
    CS: CheckpointStore,
{
    loop {
        let batch = store.read_all_forward(*last_seen, CATCHUP_BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(());
        }
        let filled = batch.len() == CATCHUP_BATCH_SIZE;
        for event in &batch {
            route_one(name, module, snapshots, dispatcher, checkpoints, instances, event, last_seen).await?;
        }
        if !filled {
            return Ok(());
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn route_one<M, SS, D, CS>(
    name: &'static str,
    module: &Arc<M>,
    snapshots: &Arc<SS>,
    dispatcher: &Arc<D>,
    checkpoints: &CS,
    instances: &mut Instances,
    event: &RecordedEvent,
    last_seen: &mut u64,
) -> Result<()>
where
    M: ProcessManagerModule,
    SS: SnapshotStore,
    D: CommandDispatcher,
    CS: CheckpointStore,
{
    if *last_seen != 0 && event.event_id <= *last_seen {
        return Ok(());
    }

    match module.interested(event) {
        Interest::Ignore => {}
        Interest::Start(uuid) | Interest::Continue(uuid) => {
            let handle = instances.get_or_spawn(uuid, name, module, snapshots, dispatcher);
            handle.process(event.clone()).await?;
        }
        Interest::Stop(uuid) => {
            let handle = instances.get_or_spawn(uuid, name, module, snapshots, dispatcher);
            handle.process(event.clone()).await?;
            instances.inner.remove(&uuid);
        }
    }

    *last_seen = event.event_id;
    checkpoints.record_checkpoint(name, event.event_id).await?;
    Ok(())
}
