//! External collaborator contracts (spec §6): an append-only event store
//! with per-stream versioning and global ordering, plus the snapshot store
//! process managers use to resume without replay. Neither is specified in
//! detail by spec.md — it is assumed external — so this module pins the
//! Rust-shaped trait boundary and ships an in-memory reference
//! implementation (`memory`) for tests and demos.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::event::{PendingEvent, RecordedEvent};

/// A batch of events delivered to a global subscriber, plus the handle used
/// to acknowledge the highest `event_id` processed (spec §4.5, §6).
#[derive(Clone, Debug)]
pub struct EventBatch {
    pub events: Vec<RecordedEvent>,
}

/// The append-only, globally ordered event log (spec §6).
///
/// `append_to_stream` is atomic: on success it assigns contiguous
/// `stream_version`s starting at `expected_version + 1`, and the events
/// become visible to `subscribe_all` in a single batch sharing a
/// monotonically increasing `event_id`.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Reads `stream_id` forward from `from_version` (exclusive), at most
    /// `max_count` events, in ascending `stream_version`. `StreamNotFound`
    /// signals the stream has never been written to.
    async fn read_stream_forward(
        &self,
        stream_id: Uuid,
        from_version: u64,
        max_count: usize,
    ) -> Result<Vec<RecordedEvent>>;

    /// Appends `events` to `stream_id`, succeeding only if the stream's
    /// current version equals `expected_version` (optimistic concurrency).
    /// Returns the newly assigned recorded events.
    async fn append_to_stream(
        &self,
        stream_id: Uuid,
        expected_version: u64,
        correlation_id: Uuid,
        causation_id: Option<Uuid>,
        events: &[PendingEvent],
    ) -> Result<Vec<RecordedEvent>>;

    /// Subscribes to the global, cross-stream event log in ascending
    /// `event_id` order. Implementations broadcast every appended batch;
    /// a slow or late subscriber may miss batches sent before it
    /// subscribed — callers resume from their persisted `last_seen_event_id`
    /// via `read_all_forward`, not by relying on the broadcast alone.
    fn subscribe_all(&self) -> broadcast::Receiver<EventBatch>;

    /// Reads the global log forward from `after_event_id` (exclusive), used
    /// by resuming subscribers to catch up on anything missed between
    /// their last acknowledgement and (re)subscribing.
    async fn read_all_forward(&self, after_event_id: u64, max_count: usize) -> Result<Vec<RecordedEvent>>;
}

/// `(source_uuid, source_version, source_type, data)` from spec §3. The
/// core treats `data` as an opaque blob (spec §9); the user module is
/// responsible for reconstructing domain state from it.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub source_uuid: String,
    pub source_version: u64,
    pub source_type: &'static str,
    pub data: serde_json::Value,
}

/// Snapshot storage keyed by `name-uuid` (spec §4.7), owned exclusively by
/// the corresponding Process Manager Instance (spec §5).
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    async fn read_snapshot(&self, source_uuid: &str) -> Result<Snapshot>;
    async fn record_snapshot(&self, snapshot: Snapshot) -> Result<()>;
}

/// Persisted cursor for an Event Handler State (spec §3: `(name,
/// last_seen_event_id)`, identity is `name`). Supervised restart resumes a
/// halted subscription from here (spec §7 recovery policy).
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Returns `0` for a subscription never checkpointed before.
    async fn read_checkpoint(&self, name: &str) -> Result<u64>;
    async fn record_checkpoint(&self, name: &str, event_id: u64) -> Result<()>;
}
