use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the command dispatch, aggregate, and event-reaction
/// runtime. Variants map directly onto the kinds a caller is expected to
/// branch on: routing failures, optimistic-concurrency clashes, timeouts,
/// and the control-flow signals raised by the event store contract.
#[derive(Error, Debug)]
pub enum CqrsError {
    #[error("command type `{0}` has no registered route")]
    UnregisteredCommand(&'static str),

    #[error("command of type `{0}` carries an invalid or missing aggregate identity")]
    InvalidAggregateIdentity(&'static str),

    #[error("aggregate `{aggregate_id}` execution timed out after {timeout_ms}ms")]
    AggregateExecutionTimeout { aggregate_id: Uuid, timeout_ms: u64 },

    #[error("optimistic concurrency conflict on stream `{stream_id}`: expected version {expected}")]
    WrongExpectedVersion { stream_id: Uuid, expected: u64 },

    #[error("command handler rejected the command: {0}")]
    DomainError(String),

    #[error("stream `{0}` was not found")]
    StreamNotFound(Uuid),

    #[error("no snapshot found for `{0}`")]
    SnapshotNotFound(String),

    #[error("event type `{0}` is not present in the type registry")]
    UnknownEventType(String),

    #[error("failed to (de)serialize event payload: {0}")]
    PayloadSerialization(#[from] serde_json::Error),

    #[error("middleware short-circuited dispatch: {0}")]
    MiddlewareRejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CqrsError>;
