/// # Subscription Saga Demo
///
/// Two aggregates (`Order`, `Subscription`), a process manager that
/// activates a subscription for every placed order, and a plain event
/// handler counting orders — the full event-reaction runtime wired
/// together against the in-memory reference store.
///
/// ## Usage
///
/// ```sh
/// cargo run --example subscription_saga
/// ```
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cqrs_runtime_core::aggregate::{Aggregate, CommandHandler};
use cqrs_runtime_core::command::{AnyCommand, Command};
use cqrs_runtime_core::dispatcher::RouterBuilder;
use cqrs_runtime_core::error::Result;
use cqrs_runtime_core::event::{DomainEvent, RecordedEvent};
use cqrs_runtime_core::event_handler::{self, EventHandler};
use cqrs_runtime_core::process_manager::{self, Interest, ProcessManagerModule};
use cqrs_runtime_core::registry::AggregateRegistry;
use cqrs_runtime_core::store::memory::{InMemoryCheckpointStore, InMemoryEventStore, InMemorySnapshotStore};

#[derive(Clone, Debug, Serialize, Deserialize)]
enum OrderEvent {
    Placed { customer: String },
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        "order.placed"
    }
}

#[derive(Clone, Debug, Default)]
struct Order {
    customer: String,
}

impl Aggregate for Order {
    type Event = OrderEvent;

    fn new(_uuid: Uuid) -> Self {
        Self::default()
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed { customer } => self.customer = customer.clone(),
        }
    }
}

#[derive(Clone, Debug)]
struct PlaceOrder {
    order_id: Uuid,
    customer: String,
}

impl Command for PlaceOrder {
    fn command_type(&self) -> &'static str {
        "order.place"
    }

    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.order_id)
    }
}

struct OrderHandler;

#[async_trait]
impl CommandHandler<Order, PlaceOrder> for OrderHandler {
    async fn handle(&self, _state: &Order, command: &PlaceOrder) -> Result<Vec<OrderEvent>> {
        Ok(vec![OrderEvent::Placed {
            customer: command.customer.clone(),
        }])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum SubscriptionEvent {
    Activated,
}

impl DomainEvent for SubscriptionEvent {
    fn event_type(&self) -> &'static str {
        "subscription.activated"
    }
}

#[derive(Clone, Debug, Default)]
struct Subscription {
    active: bool,
}

impl Aggregate for Subscription {
    type Event = SubscriptionEvent;

    fn new(_uuid: Uuid) -> Self {
        Self::default()
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SubscriptionEvent::Activated => self.active = true,
        }
    }
}

#[derive(Clone, Debug)]
struct ActivateSubscription {
    subscription_id: Uuid,
}

impl Command for ActivateSubscription {
    fn command_type(&self) -> &'static str {
        "subscription.activate"
    }

    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.subscription_id)
    }
}

struct SubscriptionHandler;

#[async_trait]
impl CommandHandler<Subscription, ActivateSubscription> for SubscriptionHandler {
    async fn handle(
        &self,
        _state: &Subscription,
        _command: &ActivateSubscription,
    ) -> Result<Vec<SubscriptionEvent>> {
        Ok(vec![SubscriptionEvent::Activated])
    }
}

/// One subscription activation per order, keyed by the order's own uuid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SubscriptionSagaState {
    dispatched: bool,
}

struct SubscriptionSaga;

#[async_trait]
impl ProcessManagerModule for SubscriptionSaga {
    type State = SubscriptionSagaState;

    fn source_type(&self) -> &'static str {
        "subscription_saga"
    }

    fn interested(&self, event: &RecordedEvent) -> Interest {
        if event.event_type == "order.placed" {
            Interest::Start(event.stream_id)
        } else {
            Interest::Ignore
        }
    }

    fn empty_state(&self) -> Self::State {
        SubscriptionSagaState::default()
    }

    async fn handle(
        &self,
        state: &Self::State,
        event: &RecordedEvent,
    ) -> Result<(Self::State, Vec<Box<dyn AnyCommand>>)> {
        if state.dispatched {
            return Ok((state.clone(), Vec::new()));
        }
        let command: Box<dyn AnyCommand> = Box::new(ActivateSubscription {
            subscription_id: event.stream_id,
        });
        Ok((SubscriptionSagaState { dispatched: true }, vec![command]))
    }
}

struct OrderCounter {
    count: AtomicU64,
}

#[async_trait]
impl EventHandler for OrderCounter {
    async fn handle_event(&self, event: &RecordedEvent) -> Result<()> {
        if event.event_type == "order.placed" {
            let total = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            println!("orders placed so far: {total}");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let order_registry = AggregateRegistry::<Order, InMemoryEventStore>::new(store.clone());
    let subscription_registry = AggregateRegistry::<Subscription, InMemoryEventStore>::new(store.clone());

    let router = Arc::new(
        RouterBuilder::new()
            .route::<Order, PlaceOrder, InMemoryEventStore>(
                "order.place",
                order_registry.clone(),
                OrderHandler,
                Duration::from_secs(1),
            )
            .route::<Subscription, ActivateSubscription, InMemoryEventStore>(
                "subscription.activate",
                subscription_registry.clone(),
                SubscriptionHandler,
                Duration::from_secs(1),
            )
            .build(),
    );

    let order_counter = OrderCounter {
        count: AtomicU64::new(0),
    };
    let _handler_task = event_handler::spawn("order_counter", store.clone(), checkpoints.clone(), order_counter);

    let _saga_task = process_manager::router::spawn(
        "subscription_saga",
        Arc::new(SubscriptionSaga),
        store.clone(),
        snapshots.clone(),
        router.clone(),
        checkpoints.clone(),
    );

    let order_id = Uuid::new_v4();
    router
        .dispatch(
            &PlaceOrder {
                order_id,
                customer: "grace".to_string(),
            },
            None,
        )
        .await?;

    // Give the subscriber tasks a moment to drain the broadcast before exit.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}
