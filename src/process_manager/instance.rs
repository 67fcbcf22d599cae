//! The Process Manager Instance actor (spec §4.7): one per `(name, uuid)`,
//! resuming from its snapshot, folding events onto its domain state, and
//! dispatching emitted commands downstream before acknowledging.
//!
//! Structured exactly like the aggregate actor: a `tokio::spawn`ed task
//! owning a bounded mailbox, replies delivered over a `oneshot` channel,
//! one event processed to completion before the next is taken off the
//! mailbox.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::ProcessManagerModule;
use crate::dispatcher::CommandDispatcher;
use crate::error::{CqrsError, Result};
use crate::event::RecordedEvent;
use crate::store::{Snapshot, SnapshotStore};

const MAILBOX_CAPACITY: usize = 64;

struct ProcessEvent {
    event: RecordedEvent,
    reply: oneshot::Sender<Result<()>>,
}

/// A cheap, cloneable reference to a live process manager instance.
pub struct ProcessManagerHandle {
    pub uuid: Uuid,
    sender: mpsc::Sender<ProcessEvent>,
}

impl Clone for ProcessManagerHandle {
    fn clone(&self) -> Self {
        Self {
            uuid: self.uuid,
            sender: self.sender.clone(),
        }
    }
}

impl ProcessManagerHandle {
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Routes `event` to this instance and awaits its acknowledgement —
    /// the router only acks its upstream subscription after this resolves
    /// (spec §4.6 "acknowledgement ... occurs only after the routed
    /// instance has acknowledged processing").
    pub async fn process(&self, event: RecordedEvent) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.sender
            .send(ProcessEvent { event, reply })
            .await
            .map_err(|_| {
                CqrsError::Other(anyhow::anyhow!(
                    "process manager instance `{}` is no longer running",
                    self.uuid
                ))
            })?;
        reply_rx.await.map_err(|_| {
            CqrsError::Other(anyhow::anyhow!(
                "process manager instance `{}` dropped its reply channel",
                self.uuid
            ))
        })?
    }
}

/// Spawns the instance for `(name, uuid)`, restoring its snapshot before
/// the mailbox accepts any event.
pub fn spawn<M, SS, D>(
    name: &'static str,
    uuid: Uuid,
    module: Arc<M>,
    snapshots: Arc<SS>,
    dispatcher: Arc<D>,
) -> ProcessManagerHandle
where
    M: ProcessManagerModule,
    SS: SnapshotStore,
    D: CommandDispatcher,
{
    let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
    tokio::spawn(run(name, uuid, module, snapshots, dispatcher, receiver));
    ProcessManagerHandle { uuid, sender }
}

#[instrument(skip(module, snapshots, dispatcher, receiver), fields(process_manager = name, uuid = %uuid))]
async fn run<M, SS, D>(
    name: &'static str,
    uuid: Uuid,
    module: Arc<M>,
    snapshots: Arc<SS>,
    dispatcher: Arc<D>,
    mut receiver: mpsc::Receiver<ProcessEvent>,
) where
    M: ProcessManagerModule,
    SS: SnapshotStore,
    D: CommandDispatcher,
{
    let source_uuid = format!("{name}-{uuid}");
    let (mut domain_state, mut last_seen_event_id) =
        init_state(&module, &*snapshots, &source_uuid).await;
    debug!(last_seen_event_id, "process manager instance initialized");

    while let Some(ProcessEvent { event, reply }) = receiver.recv().await {
        let outcome = process_event(
            &module,
            &*snapshots,
            &*dispatcher,
            &source_uuid,
            &mut domain_state,
            &mut last_seen_event_id,
            &event,
        )
        .await;
        let _ = reply.send(outcome);
    }

    debug!("process manager instance mailbox closed, exiting");
}

async fn init_state<M, SS>(module: &M, snapshots: &SS, source_uuid: &str) -> (M::State, u64)
where
    M: ProcessManagerModule,
    SS: SnapshotStore,
{
    match snapshots.read_snapshot(source_uuid).await {
        Ok(snapshot) => match serde_json::from_value(snapshot.data) {
            Ok(state) => (state, snapshot.source_version),
            Err(err) => {
                warn!(error = %err, "snapshot failed to decode, starting empty");
                (module.empty_state(), 0)
            }
        },
        Err(CqrsError::SnapshotNotFound(_)) => (module.empty_state(), 0),
        Err(err) => {
            warn!(error = %err, "snapshot read failed, starting empty");
            (module.empty_state(), 0)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_event<M, SS, D>(
    module: &M,
    snapshots: &SS,
    dispatcher: &D,
    source_uuid: &str,
    domain_state: &mut M::State,
    last_seen_event_id: &mut u64,
    event: &RecordedEvent,
) -> Result<()>
where
    M: ProcessManagerModule,
    SS: SnapshotStore,
    D: CommandDispatcher,
{
    if *last_seen_event_id != 0 && event.event_id <= *last_seen_event_id {
        return Ok(());
    }

    let (new_state, commands) = module.handle(domain_state, event).await?;
    *domain_state = new_state;

    // Every command this instance emits is a direct reaction to `event` —
    // tag it as the cause so the events it appends carry that lineage
    // (spec §3 `RecordedEvent.causation_id`).
    for command in &commands {
        dispatcher.dispatch(&**command, Some(event.correlation_id), None).await?;
    }

    *last_seen_event_id = event.event_id;
    let data = serde_json::to_value(&*domain_state)?;
    snapshots
        .record_snapshot(Snapshot {
            source_uuid: source_uuid.to_string(),
            source_version: event.event_id,
            source_type: module.source_type(),
            data,
        })
        .await
}
