//! The Event Handler Runtime (spec §4.5): a subscription over the global
//! event log, identified by `name`, delivering events to a user handler in
//! strict `event_id` order with skip-but-ack for already-seen events and
//! halt-without-advancing on handler error.
//!
//! Modeled as a `tokio::spawn`ed task like the aggregate actor, but driven
//! by the store's broadcast subscription rather than an owned mailbox —
//! catch-up on start (and after a lagged broadcast) goes through
//! `read_all_forward`, and live delivery goes through `subscribe_all`. Two
//! handlers registered under the same `name` share a cursor via a common
//! [`CheckpointStore`] key, matching the Event Handler State identity rule.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{CqrsError, Result};
use crate::event::RecordedEvent;
use crate::store::{CheckpointStore, EventStore};

const CATCHUP_BATCH_SIZE: usize = 256;

/// A user-defined reaction to events of types it cares about. Events of
/// other types are still delivered — implementations MUST ignore what they
/// don't recognize and return `Ok(())` rather than erroring.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &RecordedEvent) -> Result<()>;
}

/// A running subscription. Dropping this handle does not stop the
/// subscription — only awaiting [`join`](Self::join) observes its outcome,
/// matching spec §5 "event processing is not externally cancellable".
pub struct EventHandlerTask {
    join: JoinHandle<Result<()>>,
}

impl EventHandlerTask {
    /// Awaits the subscription's halt. Returns `Ok(())` only if the event
    /// store's broadcast channel closed (store shutdown); any handler error
    /// surfaces here, per spec §4.5 "halts the subscription and surfaces
    /// the error".
    pub async fn join(self) -> Result<()> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(CqrsError::Other(anyhow::anyhow!(
                "event handler subscription task panicked: {err}"
            ))),
        }
    }
}

/// Spawns a subscription named `name` over `store`, delivering to `handler`
/// and persisting its cursor in `checkpoints`.
pub fn spawn<ES, CS, H>(
    name: &'static str,
    store: Arc<ES>,
    checkpoints: Arc<CS>,
    handler: H,
) -> EventHandlerTask
where
    ES: EventStore,
    CS: CheckpointStore,
    H: EventHandler,
{
    EventHandlerTask {
        join: tokio::spawn(run(name, store, checkpoints, handler)),
    }
}

#[instrument(skip(store, checkpoints, handler), fields(subscription = name))]
async fn run<ES, CS, H>(
    name: &'static str,
    store: Arc<ES>,
    checkpoints: Arc<CS>,
    handler: H,
) -> Result<()>
where
    ES: EventStore,
    CS: CheckpointStore,
    H: EventHandler,
{
    let mut last_seen = checkpoints.read_checkpoint(name).await?;
    debug!(last_seen, "event handler subscription starting");

    // Subscribe before catching up: anything appended while catch-up is
    // still reading gets buffered here rather than lost between the last
    // `read_all_forward` and a later `subscribe_all`. `process_one`'s
    // `event_id <= last_seen` check dedupes the overlap this creates.
    let mut receiver = store.subscribe_all();
    catch_up(name, &store, &checkpoints, &handler, &mut last_seen).await?;

    loop {
        match receiver.recv().await {
            Ok(batch) => {
                for event in &batch.events {
                    process_one(name, &checkpoints, &handler, event, &mut last_seen).await?;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscription lagged behind the broadcast, resyncing");
                catch_up(name, &store, &checkpoints, &handler, &mut last_seen).await?;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event store broadcast closed, subscription stopping");
                return Ok(());
            }
        }
    }
}

async fn catch_up<ES, CS, H>(
    name: &'static str,
    store: &ES,
    checkpoints: &CS,
    handler: &H,
    last_seen: &mut u64,
) -> Result<()>
where
    ES: EventStore,
    CS: CheckpointStore,
    H: EventHandler,
{
    loop {
        let batch = store.read_all_forward(*last_seen, CATCHUP_BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(());
        }
        let filled = batch.len() == CATCHUP_BATCH_SIZE;
        for event in &batch {
            process_one(name, checkpoints, handler, event, last_seen).await?;
        }
        if !filled {
            return Ok(());
        }
    }
}

async fn process_one<CS, H>(
    name: &'static str,
    checkpoints: &CS,
    handler: &H,
    event: &RecordedEvent,
    last_seen: &mut u64,
) -> Result<()>
where
    CS: CheckpointStore,
    H: EventHandler,
{
    if *last_seen != 0 && event.event_id <= *last_seen {
        debug!(event_id = event.event_id, "already seen, skipping body");
        return Ok(());
    }

    if let Err(err) = handler.handle_event(event).await {
        warn!(event_id = event.event_id, error = %err, "handler rejected event, halting subscription");
        return Err(err);
    }

    *last_seen = event.event_id;
    checkpoints.record_checkpoint(name, event.event_id).await?;
    Ok(())
}
