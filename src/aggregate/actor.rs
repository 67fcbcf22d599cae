//! The Aggregate Actor (spec §4.3): rebuilds state from the log, serializes
//! command execution one message at a time, and appends resulting events
//! under optimistic concurrency.
//!
//! Modeled as a `tokio::spawn`ed task owning a bounded mailbox, in the
//! oneshot-reply actor idiom used throughout the pack's actor-based CQRS
//! examples (e.g. the `WorkflowActor` mailbox loop). The actor never times
//! itself out — per spec §4.3/§9, a timeout is the *caller's* view of a
//! bounded wait; the actor runs every command to completion regardless, so
//! state is never left mid-command.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{Aggregate, AggregateState};
use crate::error::{CqrsError, Result};
use crate::event::PendingEvent;
use crate::store::EventStore;

/// Batch size for the reload-from-log init path (spec §4.3). A named
/// constant because it trades off recovery latency against memory, not a
/// value to tune inline.
pub const AGGREGATE_RELOAD_BATCH_SIZE: usize = 100;

const MAILBOX_CAPACITY: usize = 64;

pub(crate) type HandlerFuture<A> =
    Pin<Box<dyn Future<Output = Result<Vec<<A as Aggregate>::Event>>> + Send>>;
pub(crate) type HandlerFn<A> = Box<dyn FnOnce(A) -> HandlerFuture<A> + Send>;

struct ExecuteRequest<A: Aggregate> {
    correlation_id: Uuid,
    causation_id: Option<Uuid>,
    run: HandlerFn<A>,
    reply: oneshot::Sender<Result<()>>,
}

enum ActorMessage<A: Aggregate> {
    Execute(ExecuteRequest<A>),
}

/// A cheap, cloneable reference to a live aggregate actor. Holding one does
/// not keep the actor running — if its mailbox sender is the last one
/// dropped, the task exits; the registry is the only exclusive owner
/// (spec §3 "Registries own actor handles exclusively").
pub struct AggregateHandle<A: Aggregate> {
    pub uuid: Uuid,
    sender: mpsc::Sender<ActorMessage<A>>,
}

impl<A: Aggregate> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            uuid: self.uuid,
            sender: self.sender.clone(),
        }
    }
}

impl<A: Aggregate> AggregateHandle<A> {
    /// True once the actor's mailbox has closed — a signal to the registry
    /// that the next `get_or_start` should respawn rather than reuse.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Enqueues an execution request and returns a receiver for its
    /// outcome. The send itself only fails if the actor has already
    /// crashed; once sent, the command is guaranteed to run to completion
    /// even if the caller later stops waiting on the receiver (timeout).
    pub(crate) async fn submit(
        &self,
        correlation_id: Uuid,
        causation_id: Option<Uuid>,
        run: HandlerFn<A>,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        let (reply, reply_rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Execute(ExecuteRequest {
                correlation_id,
                causation_id,
                run,
                reply,
            }))
            .await
            .map_err(|_| {
                CqrsError::Other(anyhow::anyhow!(
                    "aggregate actor `{}` is no longer running",
                    self.uuid
                ))
            })?;
        Ok(reply_rx)
    }
}

/// Spawns a new aggregate actor for `uuid`, reloading its full history
/// before the mailbox accepts any message — callers never observe a
/// partially-initialized actor because `spawn` only returns the handle
/// after the loop below begins, and the loop's first action is `init_state`.
pub fn spawn<A, ES>(uuid: Uuid, store: Arc<ES>) -> AggregateHandle<A>
where
    A: Aggregate,
    ES: EventStore,
{
    let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
    tokio::spawn(run::<A, ES>(uuid, store, receiver));
    AggregateHandle { uuid, sender }
}

#[instrument(skip(store, receiver), fields(aggregate_uuid = %uuid))]
async fn run<A, ES>(uuid: Uuid, store: Arc<ES>, mut receiver: mpsc::Receiver<ActorMessage<A>>)
where
    A: Aggregate,
    ES: EventStore,
{
    match init_state::<A, ES>(uuid, &store).await {
        Ok(mut state) => {
            debug!(version = state.version, "aggregate actor initialized");
            while let Some(ActorMessage::Execute(request)) = receiver.recv().await {
                handle_execute(&store, &mut state, request).await;
            }
        }
        Err(err) => {
            // A stored event failed to decode against this aggregate's event
            // type (UnknownEventType, spec §7) — fatal to this actor. Every
            // command it ever receives fails rather than the actor silently
            // running against incomplete history.
            let reason = err.to_string();
            warn!(error = %reason, "aggregate actor failed to initialize, rejecting all commands");
            while let Some(ActorMessage::Execute(request)) = receiver.recv().await {
                let _ = request.reply.send(Err(CqrsError::Other(anyhow::anyhow!(
                    "aggregate `{uuid}` failed to initialize: {reason}"
                ))));
            }
        }
    }

    debug!("aggregate actor mailbox closed, exiting");
}

#[instrument(skip(store, state, request), fields(aggregate_uuid = %state.uuid))]
async fn handle_execute<A, ES>(
    store: &Arc<ES>,
    state: &mut AggregateState<A>,
    request: ExecuteRequest<A>,
) where
    A: Aggregate,
    ES: EventStore,
{
    let ExecuteRequest {
        correlation_id,
        causation_id,
        run,
        reply,
    } = request;

    let expected_version = state.version;
    let domain_snapshot = state.domain_state.clone();

    let outcome = run(domain_snapshot).await;
    let events = match outcome {
        Err(err) => {
            warn!(error = %err, "command handler rejected the command");
            let _ = reply.send(Err(err));
            return;
        }
        Ok(events) => events,
    };

    if events.is_empty() {
        let _ = reply.send(Ok(()));
        return;
    }

    let pending: Result<Vec<PendingEvent>> =
        events.iter().map(PendingEvent::new).collect();
    let pending = match pending {
        Ok(pending) => pending,
        Err(err) => {
            let _ = reply.send(Err(err));
            return;
        }
    };

    state.pending_events = events;
    match store
        .append_to_stream(
            state.uuid,
            expected_version,
            correlation_id,
            causation_id,
            &pending,
        )
        .await
    {
        Ok(_) => {
            for event in &state.pending_events {
                state.domain_state.apply(event);
            }
            state.version = expected_version + state.pending_events.len() as u64;
            state.pending_events.clear();
            let _ = reply.send(Ok(()));
        }
        Err(err) => {
            warn!(error = %err, "append failed, discarding pending events");
            state.pending_events.clear();
            let _ = reply.send(Err(err));
        }
    }
}

async fn init_state<A, ES>(uuid: Uuid, store: &ES) -> Result<AggregateState<A>>
where
    A: Aggregate,
    ES: EventStore,
{
    let mut recorded = Vec::new();
    let mut from_version = 0u64;

    loop {
        match store
            .read_stream_forward(uuid, from_version, AGGREGATE_RELOAD_BATCH_SIZE)
            .await
        {
            Ok(batch) if batch.is_empty() => break,
            Ok(batch) => {
                let filled = batch.len() == AGGREGATE_RELOAD_BATCH_SIZE;
                from_version = batch.last().map(|e| e.stream_version).unwrap_or(from_version);
                recorded.extend(batch);
                if !filled {
                    break;
                }
            }
            Err(CqrsError::StreamNotFound(_)) => break,
            Err(err) => return Err(err),
        }
    }

    if recorded.is_empty() {
        return Ok(AggregateState {
            uuid,
            version: 0,
            pending_events: Vec::new(),
            domain_state: A::new(uuid),
        });
    }

    let version = recorded.last().map(|e| e.stream_version).unwrap_or(0);
    let events: Vec<A::Event> = recorded.iter().map(|r| r.decode::<A::Event>()).collect::<Result<_>>()?;

    Ok(AggregateState {
        uuid,
        version,
        pending_events: Vec::new(),
        domain_state: A::load(uuid, &events),
    })
}

