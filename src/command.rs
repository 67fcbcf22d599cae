//! Command data model (spec §3): an immutable value tagged by its type,
//! carrying an aggregate identity accessible by a named field.

use uuid::Uuid;

/// A command value routed to exactly one aggregate. `command_type` is the
/// routing key (spec §4.4); `aggregate_id` extracts the identity field the
/// router uses to locate the target actor.
///
/// Distinct command types may resolve to the same `command_type` only if
/// they are meant to share a router entry; ordinarily each `Command` impl
/// returns its own fully qualified name.
pub trait Command: Send + Sync + 'static {
    fn command_type(&self) -> &'static str;

    /// Returns `None` for a missing or empty identity, surfaced by the
    /// router as `InvalidAggregateIdentity` (spec §4.4 step 2).
    fn aggregate_id(&self) -> Option<Uuid>;
}

/// Lets the router accept `&dyn AnyCommand` at its single dynamic entry
/// point and downcast back to the concrete type a registered route expects.
/// `Command` itself stays free of an `Any` bound so it alone remains usable
/// as a plain generic constraint; every `Command` gets this for free.
///
/// Grounded on the type-erased handler registry pattern used for
/// multi-command-type dispatch tables elsewhere in the pack (a
/// `downcast::<H>()` over `Arc<dyn Any + Send + Sync>`).
pub trait AnyCommand: Command {
    fn as_any(&self) -> &dyn std::any::Any;
}

impl<T: Command> AnyCommand for T {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
