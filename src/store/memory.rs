//! Reference, in-memory implementations of the event store and snapshot
//! store contracts. Grounded on the teacher's `InMemoryEventStore`
//! (`examples/lib/common.rs`), generalized from a per-aggregate map to a
//! globally ordered log with a broadcast channel, since this spec's
//! `subscribe_all` (§6) needs cross-stream ordering the teacher's example
//! never had to provide.
//!
//! This is test/demo infrastructure, not a durable backend — it never
//! persists beyond process lifetime, matching spec §1's assumption that a
//! real event store is an external collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::error::{CqrsError, Result};
use crate::event::{PendingEvent, RecordedEvent};
use crate::store::{CheckpointStore, EventBatch, EventStore, Snapshot, SnapshotStore};

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    streams: HashMap<Uuid, Vec<RecordedEvent>>,
    global: Vec<RecordedEvent>,
    next_event_id: u64,
}

/// An in-memory, single-process `EventStore`. Streams are kept indefinitely
/// for the life of the store; nothing is ever compacted or evicted.
pub struct InMemoryEventStore {
    inner: Arc<Mutex<Inner>>,
    sender: broadcast::Sender<EventBatch>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            sender,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryEventStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sender: self.sender.clone(),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn read_stream_forward(
        &self,
        stream_id: Uuid,
        from_version: u64,
        max_count: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let inner = self.inner.lock().await;
        let stream = inner
            .streams
            .get(&stream_id)
            .ok_or(CqrsError::StreamNotFound(stream_id))?;

        Ok(stream
            .iter()
            .filter(|e| e.stream_version > from_version)
            .take(max_count)
            .cloned()
            .collect())
    }

    async fn append_to_stream(
        &self,
        stream_id: Uuid,
        expected_version: u64,
        correlation_id: Uuid,
        causation_id: Option<Uuid>,
        events: &[PendingEvent],
    ) -> Result<Vec<RecordedEvent>> {
        let mut inner = self.inner.lock().await;

        let current_version = inner
            .streams
            .get(&stream_id)
            .and_then(|s| s.last())
            .map(|e| e.stream_version)
            .unwrap_or(0);

        if current_version != expected_version {
            return Err(CqrsError::WrongExpectedVersion {
                stream_id,
                expected: expected_version,
            });
        }

        let created_at = Utc::now();
        let mut recorded = Vec::with_capacity(events.len());
        for (offset, pending) in events.iter().enumerate() {
            let event_id = inner.next_event_id + 1;
            inner.next_event_id = event_id;

            recorded.push(RecordedEvent {
                event_id,
                stream_id,
                stream_version: expected_version + offset as u64 + 1,
                correlation_id,
                causation_id,
                created_at,
                event_type: pending.event_type.to_string(),
                payload: pending.payload.clone(),
            });
        }

        inner
            .streams
            .entry(stream_id)
            .or_default()
            .extend(recorded.iter().cloned());
        inner.global.extend(recorded.iter().cloned());

        // No subscribers is not an error: a fresh store with nothing yet
        // listening on `subscribe_all` should not fail appends.
        let _ = self.sender.send(EventBatch {
            events: recorded.clone(),
        });

        Ok(recorded)
    }

    fn subscribe_all(&self) -> broadcast::Receiver<EventBatch> {
        self.sender.subscribe()
    }

    async fn read_all_forward(
        &self,
        after_event_id: u64,
        max_count: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .global
            .iter()
            .filter(|e| e.event_id > after_event_id)
            .take(max_count)
            .cloned()
            .collect())
    }
}

/// An in-memory `SnapshotStore`, keyed exactly as spec §4.7 requires
/// (`name-uuid`).
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn read_snapshot(&self, source_uuid: &str) -> Result<Snapshot> {
        self.snapshots
            .lock()
            .await
            .get(source_uuid)
            .cloned()
            .ok_or_else(|| CqrsError::SnapshotNotFound(source_uuid.to_string()))
    }

    async fn record_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .lock()
            .await
            .insert(snapshot.source_uuid.clone(), snapshot);
        Ok(())
    }
}

/// An in-memory `CheckpointStore`. Like the other reference stores, cursors
/// live only for the process lifetime.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, u64>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn read_checkpoint(&self, name: &str) -> Result<u64> {
        Ok(self.checkpoints.lock().await.get(name).copied().unwrap_or(0))
    }

    async fn record_checkpoint(&self, name: &str, event_id: u64) -> Result<()> {
        self.checkpoints
            .lock()
            .await
            .insert(name.to_string(), event_id);
        Ok(())
    }
}
