//! End-to-end tests against the public API, using the in-memory reference
//! store throughout. Grounded in the teacher's plain `#[tokio::test]`
//! integration style (no custom harness).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use cqrs_runtime_core::aggregate::{Aggregate, CommandHandler};
use cqrs_runtime_core::command::{AnyCommand, Command};
use cqrs_runtime_core::dispatcher::RouterBuilder;
use cqrs_runtime_core::error::{CqrsError, Result};
use cqrs_runtime_core::event::{DomainEvent, RecordedEvent};
use cqrs_runtime_core::event_handler::{self, EventHandler};
use cqrs_runtime_core::process_manager::{self, Interest, ProcessManagerModule};
use cqrs_runtime_core::registry::AggregateRegistry;
use cqrs_runtime_core::store::memory::{InMemoryCheckpointStore, InMemoryEventStore, InMemorySnapshotStore};
use cqrs_runtime_core::store::{CheckpointStore, EventStore};

#[derive(Clone, Debug, Serialize, Deserialize)]
enum CounterEvent {
    Ticked,
}

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        "counter.ticked"
    }
}

#[derive(Clone, Debug, Default)]
struct Counter {
    ticks: u64,
}

impl Aggregate for Counter {
    type Event = CounterEvent;

    fn new(_uuid: Uuid) -> Self {
        Self::default()
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CounterEvent::Ticked => self.ticks += 1,
        }
    }
}

#[derive(Clone, Debug)]
struct Tick {
    counter_id: Uuid,
}

impl Command for Tick {
    fn command_type(&self) -> &'static str {
        "counter.tick"
    }

    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.counter_id)
    }
}

struct InstantHandler;

#[async_trait]
impl CommandHandler<Counter, Tick> for InstantHandler {
    async fn handle(&self, _state: &Counter, _command: &Tick) -> Result<Vec<CounterEvent>> {
        Ok(vec![CounterEvent::Ticked])
    }
}

struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl CommandHandler<Counter, Tick> for SlowHandler {
    async fn handle(&self, _state: &Counter, _command: &Tick) -> Result<Vec<CounterEvent>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![CounterEvent::Ticked])
    }
}

#[tokio::test(start_paused = true)]
async fn dispatch_times_out_when_handler_outlasts_the_default_timeout() {
    let store = Arc::new(InMemoryEventStore::new());
    let registry = AggregateRegistry::<Counter, InMemoryEventStore>::new(store.clone());

    let router = RouterBuilder::new()
        .route::<Counter, Tick, InMemoryEventStore>(
            "counter.tick",
            registry.clone(),
            SlowHandler {
                delay: Duration::from_millis(2000),
            },
            Duration::from_millis(1000),
        )
        .build();

    let counter_id = Uuid::new_v4();

    let timed_out = router.dispatch(&Tick { counter_id }, None).await;
    assert!(matches!(
        timed_out,
        Err(CqrsError::AggregateExecutionTimeout { .. })
    ));

    let overridden = router
        .dispatch(&Tick { counter_id }, Some(Duration::from_millis(2500)))
        .await;
    assert!(overridden.is_ok());
}

#[tokio::test]
async fn append_and_rebuild_preserves_domain_state_across_a_respawned_actor() {
    let store = Arc::new(InMemoryEventStore::new());
    let registry = AggregateRegistry::<Counter, InMemoryEventStore>::new(store.clone());

    let router = RouterBuilder::new()
        .route::<Counter, Tick, InMemoryEventStore>(
            "counter.tick",
            registry.clone(),
            InstantHandler,
            Duration::from_secs(1),
        )
        .build();

    let counter_id = Uuid::new_v4();
    router.dispatch(&Tick { counter_id }, None).await.unwrap();
    router.dispatch(&Tick { counter_id }, None).await.unwrap();
    router.dispatch(&Tick { counter_id }, None).await.unwrap();

    let recorded = store
        .read_stream_forward(counter_id, 0, 100)
        .await
        .unwrap();
    assert_eq!(recorded.len(), 3);
    assert!(recorded
        .iter()
        .enumerate()
        .all(|(i, e)| e.stream_version == i as u64 + 1));

    // A brand new registry over the same store simulates the actor having
    // been stopped and restarted: it must reload the full stream.
    let fresh_registry = AggregateRegistry::<Counter, InMemoryEventStore>::new(store.clone());
    let fresh_router = RouterBuilder::new()
        .route::<Counter, Tick, InMemoryEventStore>(
            "counter.tick",
            fresh_registry.clone(),
            InstantHandler,
            Duration::from_secs(1),
        )
        .build();
    fresh_router.dispatch(&Tick { counter_id }, None).await.unwrap();

    let events: Vec<CounterEvent> = store
        .read_stream_forward(counter_id, 0, 100)
        .await
        .unwrap()
        .iter()
        .map(|e| e.decode::<CounterEvent>().unwrap())
        .collect();
    let rebuilt = Counter::load(counter_id, &events);
    assert_eq!(rebuilt.ticks, 4);
}

#[tokio::test]
async fn concurrent_dispatches_to_one_aggregate_are_serialized() {
    let store = Arc::new(InMemoryEventStore::new());
    let registry = AggregateRegistry::<Counter, InMemoryEventStore>::new(store.clone());

    let router = Arc::new(
        RouterBuilder::new()
            .route::<Counter, Tick, InMemoryEventStore>(
                "counter.tick",
                registry.clone(),
                InstantHandler,
                Duration::from_secs(1),
            )
            .build(),
    );

    let counter_id = Uuid::new_v4();
    let mut joins = Vec::new();
    for _ in 0..20 {
        let router = router.clone();
        joins.push(tokio::spawn(
            async move { router.dispatch(&Tick { counter_id }, None).await },
        ));
    }

    for join in joins {
        join.await.unwrap().expect("no dispatch should observe a concurrency conflict");
    }

    let events = store.read_stream_forward(counter_id, 0, 100).await.unwrap();
    assert_eq!(events.len(), 20);
    assert!(events
        .iter()
        .enumerate()
        .all(|(i, e)| e.stream_version == i as u64 + 1));
}

struct InterestingOnlyHandler {
    seen: Mutex<Vec<u64>>,
}

#[async_trait]
impl EventHandler for InterestingOnlyHandler {
    async fn handle_event(&self, event: &RecordedEvent) -> Result<()> {
        if event.event_type == "counter.ticked" {
            self.seen.lock().await.push(event.event_id);
        }
        Ok(())
    }
}

#[tokio::test]
async fn event_handler_ignores_uninteresting_events_and_does_not_redeliver_after_resume() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    // Pre-populate the stream before any subscriber exists, forcing the
    // handler's initial run through the catch-up path rather than the live
    // broadcast.
    let stream_id = Uuid::new_v4();
    for (event_type, payload) in [
        ("counter.uninteresting", serde_json::json!({"n": 1})),
        ("counter.ticked", serde_json::json!({})),
        ("counter.uninteresting", serde_json::json!({"n": 2})),
        ("counter.ticked", serde_json::json!({})),
        ("counter.uninteresting", serde_json::json!({"n": 3})),
    ] {
        let pending = cqrs_runtime_core::event::PendingEvent {
            event_type,
            payload,
        };
        let current = store.read_stream_forward(stream_id, 0, 100).await;
        let expected_version = match current {
            Ok(events) => events.last().map(|e| e.stream_version).unwrap_or(0),
            Err(_) => 0,
        };
        store
            .append_to_stream(stream_id, expected_version, Uuid::new_v4(), None, &[pending])
            .await
            .unwrap();
    }

    let handler = Arc::new(InterestingOnlyHandler {
        seen: Mutex::new(Vec::new()),
    });
    let task = event_handler::spawn("interesting_only", store.clone(), checkpoints.clone(), FirstHandler(handler.clone()));

    wait_until_checkpoint_reaches(&*checkpoints, "interesting_only", 5).await;
    drop(task);

    {
        let seen = handler.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    // Resuming a second subscription under the same name must not replay
    // anything already acknowledged.
    let second_seen = Arc::new(Mutex::new(Vec::new()));
    struct Recorder(Arc<Mutex<Vec<u64>>>);
    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: &RecordedEvent) -> Result<()> {
            self.0.lock().await.push(event.event_id);
            Ok(())
        }
    }
    let second_task = event_handler::spawn(
        "interesting_only",
        store.clone(),
        checkpoints.clone(),
        Recorder(second_seen.clone()),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(second_task);

    assert!(second_seen.lock().await.is_empty());
}

struct FirstHandler(Arc<InterestingOnlyHandler>);

#[async_trait]
impl EventHandler for FirstHandler {
    async fn handle_event(&self, event: &RecordedEvent) -> Result<()> {
        self.0.handle_event(event).await
    }
}

async fn wait_until_checkpoint_reaches<CS: CheckpointStore>(checkpoints: &CS, name: &str, target: u64) {
    for _ in 0..200 {
        if checkpoints.read_checkpoint(name).await.unwrap() >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("checkpoint `{name}` never reached {target}");
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum OrderEvent {
    Placed,
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        "order.placed"
    }
}

#[derive(Clone, Debug, Default)]
struct Order;

impl Aggregate for Order {
    type Event = OrderEvent;
    fn new(_uuid: Uuid) -> Self {
        Self
    }
    fn apply(&mut self, _event: &Self::Event) {}
}

#[derive(Clone, Debug)]
struct PlaceOrder {
    order_id: Uuid,
}

impl Command for PlaceOrder {
    fn command_type(&self) -> &'static str {
        "order.place"
    }
    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.order_id)
    }
}

struct PlaceOrderHandler;

#[async_trait]
impl CommandHandler<Order, PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, _state: &Order, _command: &PlaceOrder) -> Result<Vec<OrderEvent>> {
        Ok(vec![OrderEvent::Placed])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum ActivationEvent {
    Activated,
}

impl DomainEvent for ActivationEvent {
    fn event_type(&self) -> &'static str {
        "subscription.activated"
    }
}

#[derive(Clone, Debug, Default)]
struct Subscription;

impl Aggregate for Subscription {
    type Event = ActivationEvent;
    fn new(_uuid: Uuid) -> Self {
        Self
    }
    fn apply(&mut self, _event: &Self::Event) {}
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

struct ActivateHandler {
    calls: Arc<AtomicU64>,
}

#[async_trait]
impl CommandHandler<Subscription, ActivateSubscription> for ActivateHandler {
    async fn handle(
        &self,
        _state: &Subscription,
        _command: &ActivateSubscription,
    ) -> Result<Vec<ActivationEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ActivationEvent::Activated])
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SagaState {
    dispatched: bool,
}

struct OneShotSaga;

#[async_trait]
impl ProcessManagerModule for OneShotSaga {
    type State = SagaState;

    fn source_type(&self) -> &'static str {
        "one_shot_saga"
    }

    fn interested(&self, event: &RecordedEvent) -> Interest {
        if event.event_type == "order.placed" {
            Interest::Start(event.stream_id)
        } else {
            Interest::Ignore
        }
    }

    fn empty_state(&self) -> Self::State {
        SagaState::default()
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
        Ok((SagaState { dispatched: true }, vec![command]))
    }
}

#[tokio::test]
async fn process_manager_dispatches_exactly_once_per_instance_and_snapshots_progress() {
    let store = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    let order_registry = AggregateRegistry::<Order, InMemoryEventStore>::new(store.clone());
    let subscription_registry = AggregateRegistry::<Subscription, InMemoryEventStore>::new(store.clone());
    let activation_calls = Arc::new(AtomicU64::new(0));

    let router = Arc::new(
        RouterBuilder::new()
            .route::<Order, PlaceOrder, InMemoryEventStore>(
                "order.place",
                order_registry.clone(),
                PlaceOrderHandler,
                Duration::from_secs(1),
            )
            .route::<Subscription, ActivateSubscription, InMemoryEventStore>(
                "subscription.activate",
                subscription_registry.clone(),
                ActivateHandler {
                    calls: activation_calls.clone(),
                },
                Duration::from_secs(1),
            )
            .build(),
    );

    let _router_task = process_manager::router::spawn(
        "one_shot_saga",
        Arc::new(OneShotSaga),
        store.clone(),
        snapshots.clone(),
        router.clone(),
        checkpoints.clone(),
    );

    let order_id = Uuid::new_v4();
    router.dispatch(&PlaceOrder { order_id }, None).await.unwrap();

    for _ in 0..200 {
        if activation_calls.load(Ordering::SeqCst) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(activation_calls.load(Ordering::SeqCst), 1);

    let source_uuid = format!("one_shot_saga-{order_id}");
    let snapshot = snapshots.read_snapshot(&source_uuid).await.unwrap();
    let state: SagaState = serde_json::from_value(snapshot.data).unwrap();
    assert!(state.dispatched);
    assert!(snapshot.source_version >= 1);
}
