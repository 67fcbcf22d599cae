//! The middleware contract (spec §6): an ordered chain wrapping `dispatch`.
//! Each layer observes the command before and the result after, and may
//! short-circuit with an error. This module specifies only the interface
//! collaborator — middleware pipelines beyond this contract (retries,
//! auth, rate limiting) are user-written and out of scope (spec §1).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::command::AnyCommand;
use crate::error::Result;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The innermost step a middleware chain eventually reaches: the concrete,
/// type-erased route performing registry lookup and aggregate execution
/// (spec §4.4 steps 3-5).
pub(crate) trait ErasedRoute: Send + Sync + 'static {
    fn dispatch<'a>(
        &'a self,
        command: &'a dyn AnyCommand,
        causation_id: Option<Uuid>,
        timeout_override: Option<Duration>,
    ) -> BoxFuture<'a, Result<Uuid>>;
}

/// The remainder of the middleware chain, including the terminal route.
/// Consumed by `run` so a layer can only invoke it once per call, matching
/// "wrapping" semantics rather than open-ended interception.
pub struct Next<'a> {
    pub(crate) chain: &'a [Arc<dyn DispatchMiddleware>],
    pub(crate) route: &'a dyn ErasedRoute,
    pub(crate) causation_id: Option<Uuid>,
    pub(crate) timeout_override: Option<Duration>,
}

impl<'a> Next<'a> {
    pub async fn run(self, command: &dyn AnyCommand) -> Result<Uuid> {
        match self.chain.split_first() {
            Some((layer, rest)) => {
                let next = Next {
                    chain: rest,
                    route: self.route,
                    causation_id: self.causation_id,
                    timeout_override: self.timeout_override,
                };
                layer.call(command, next).await
            }
            None => {
                self.route
                    .dispatch(command, self.causation_id, self.timeout_override)
                    .await
            }
        }
    }
}

/// A single middleware layer wrapping command dispatch.
#[async_trait]
pub trait DispatchMiddleware: Send + Sync + 'static {
    async fn call(&self, command: &dyn AnyCommand, next: Next<'_>) -> Result<Uuid>;
}
