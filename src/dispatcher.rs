//! The Router (spec §4.4): a routing table from `command_type` to the
//! aggregate registry, handler, and default timeout that serves it. Entries
//! are registered once at startup through [`RouterBuilder`]; `dispatch` is
//! the single dynamic entry point every command type shares.
//!
//! Command types are erased behind [`AnyCommand`] so one `Router` can carry
//! routes for many unrelated `Command`/`Aggregate` pairs — the same
//! `downcast_ref::<C>()` shape used for multi-type dispatch tables
//! elsewhere in the pack, here keyed by `command_type()` instead of a
//! `TypeId`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use crate::aggregate::actor::HandlerFn;
use crate::aggregate::{Aggregate, CommandHandler};
use crate::command::{AnyCommand, Command};
use crate::error::{CqrsError, Result};
use crate::middleware::{BoxFuture, DispatchMiddleware, ErasedRoute, Next};
use crate::registry::AggregateRegistry;
use crate::store::EventStore;

struct Route<A, C, ES>
where
    A: Aggregate,
    C: Command + Clone,
    ES: EventStore,
{
    registry: AggregateRegistry<A, ES>,
    handler: Arc<dyn CommandHandler<A, C>>,
    default_timeout: Duration,
}

impl<A, C, ES> ErasedRoute for Route<A, C, ES>
where
    A: Aggregate,
    C: Command + Clone,
    ES: EventStore,
{
    fn dispatch<'a>(
        &'a self,
        command: &'a dyn AnyCommand,
        causation_id: Option<Uuid>,
        timeout_override: Option<Duration>,
    ) -> BoxFuture<'a, Result<Uuid>> {
        Box::pin(async move {
            let concrete = command
                .as_any()
                .downcast_ref::<C>()
                .expect("router stores one route per concrete command type registered under its own key")
                .clone();

            let aggregate_id = concrete
                .aggregate_id()
                .ok_or(CqrsError::InvalidAggregateIdentity(concrete.command_type()))?;

            let handle = self.registry.get_or_start(aggregate_id).await;
            let handler = self.handler.clone();
            let correlation_id = Uuid::new_v4();

            let run: HandlerFn<A> = Box::new(move |domain_state: A| {
                Box::pin(async move { handler.handle(&domain_state, &concrete).await })
            });

            let reply_rx = handle.submit(correlation_id, causation_id, run).await?;
            let timeout_duration = timeout_override.unwrap_or(self.default_timeout);

            match tokio::time::timeout(timeout_duration, reply_rx).await {
                Ok(Ok(Ok(()))) => Ok(aggregate_id),
                Ok(Ok(Err(err))) => Err(err),
                Ok(Err(_)) => Err(CqrsError::Other(anyhow::anyhow!(
                    "aggregate actor `{aggregate_id}` dropped its reply channel"
                ))),
                Err(_) => Err(CqrsError::AggregateExecutionTimeout {
                    aggregate_id,
                    timeout_ms: timeout_duration.as_millis() as u64,
                }),
            }
        })
    }
}

/// The assembled routing table plus middleware chain (spec §4.4, §6).
/// Built once via [`RouterBuilder`] and shared across callers behind an
/// `Arc` — it holds no mutable state of its own, only `Clone`-free
/// references into the registries and stores it was built with.
pub struct Router {
    routes: HashMap<&'static str, Arc<dyn ErasedRoute>>,
    middleware: Vec<Arc<dyn DispatchMiddleware>>,
}

impl Router {
    /// Routes `command` through the middleware chain to its registered
    /// aggregate, bounding the wait on the result by `timeout_override` or
    /// the route's own default (spec §4.4 steps 1-5). Equivalent to
    /// [`dispatch_caused_by`](Self::dispatch_caused_by) with no
    /// `causation_id` — the ordinary case of a command entering the system
    /// from outside rather than as a reaction to an event.
    pub async fn dispatch(
        &self,
        command: &dyn AnyCommand,
        timeout_override: Option<Duration>,
    ) -> Result<Uuid> {
        self.dispatch_caused_by(command, None, timeout_override).await
    }

    /// Same as [`dispatch`](Self::dispatch), but tags every event the
    /// command appends with `causation_id` (spec §3 `RecordedEvent`). A
    /// Process Manager Instance uses this to record which event it was
    /// reacting to when it dispatched the command (spec §4.7 step 3).
    #[instrument(skip(self, command), fields(command_type = command.command_type()))]
    pub async fn dispatch_caused_by(
        &self,
        command: &dyn AnyCommand,
        causation_id: Option<Uuid>,
        timeout_override: Option<Duration>,
    ) -> Result<Uuid> {
        let route = self
            .routes
            .get(command.command_type())
            .ok_or(CqrsError::UnregisteredCommand(command.command_type()))?
            .as_ref();

        let next = Next {
            chain: &self.middleware,
            route,
            causation_id,
            timeout_override,
        };
        next.run(command).await
    }
}

/// Object-safe view of [`Router::dispatch_caused_by`], letting a Process
/// Manager Instance (spec §4.7 step 3) hold a command dispatcher without
/// depending on the concrete `Router` type or its middleware/route generics.
#[async_trait]
pub trait CommandDispatcher: Send + Sync + 'static {
    async fn dispatch(
        &self,
        command: &dyn AnyCommand,
        causation_id: Option<Uuid>,
        timeout_override: Option<Duration>,
    ) -> Result<Uuid>;
}

#[async_trait]
impl CommandDispatcher for Router {
    async fn dispatch(
        &self,
        command: &dyn AnyCommand,
        causation_id: Option<Uuid>,
        timeout_override: Option<Duration>,
    ) -> Result<Uuid> {
        Router::dispatch_caused_by(self, command, causation_id, timeout_override).await
    }
}

/// Accumulates routes and middleware before sealing them into a [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<&'static str, Arc<dyn ErasedRoute>>,
    middleware: Vec<Arc<dyn DispatchMiddleware>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler, registry, and default timeout serving every
    /// command whose `command_type()` equals `command_type`. Multiple
    /// concrete `C`s may share a route only by registering under the same
    /// key with a handler that accepts whichever type it is given — the
    /// common case is one key per concrete command type.
    pub fn route<A, C, ES>(
        mut self,
        command_type: &'static str,
        registry: AggregateRegistry<A, ES>,
        handler: impl CommandHandler<A, C> + 'static,
        default_timeout: Duration,
    ) -> Self
    where
        A: Aggregate,
        C: Command + Clone,
        ES: EventStore,
    {
        self.routes.insert(
            command_type,
            Arc::new(Route {
                registry,
                handler: Arc::new(handler),
                default_timeout,
            }),
        );
        self
    }

    pub fn middleware(mut self, layer: impl DispatchMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(layer));
        self
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
            middleware: self.middleware,
        }
    }
}
