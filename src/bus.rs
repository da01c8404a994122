//! The external collaborators the task-dispatch loop is built against
//! (§1: "the core never constructs a concrete pub/sub client or auth flow
//! itself"). Production wiring implements these against the real bus
//! client and credential provider; tests implement them against in-memory
//! channels.

use async_trait::async_trait;
use thiserror::Error;

use crate::task::{TaskRequest, TaskResponse};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("subscription closed")]
    Closed,
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// A handle to one delivered message. Dropping it without acking or
/// nacking leaves the message's fate to the bus's own redelivery timeout,
/// matching §4.H's "do not acknowledge" cases (non-action is the answer,
/// not an explicit nack).
#[async_trait]
pub trait DeliveredTask: Send + Sync {
    /// The raw bytes to decode as a `TaskReqMsg`. Decode failures are
    /// handled by the dispatch loop itself (§4.H step 2), not here.
    fn payload(&self) -> &[u8];

    /// The bus-reported publish time of this message, Unix epoch ms.
    fn published_ms(&self) -> i64;

    async fn ack(self: Box<Self>) -> Result<(), BusError>;
}

/// The inbound "task" subscription (§6).
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn next(&self) -> Result<Box<dyn DeliveredTask>, BusError>;

    /// Decodes a delivered message's payload into a [`TaskRequest`].
    /// Separated from `next()` so the dispatch loop can apply its own
    /// "decode failure => ack and drop" policy uniformly.
    fn decode(&self, payload: &[u8]) -> Result<TaskRequest, BusError>;
}

/// The outbound "progress" topic (§6).
#[async_trait]
pub trait ResponsePublisher: Send + Sync {
    async fn publish(&self, response: &TaskResponse) -> Result<(), BusError>;
}

/// Out of scope for computation (§1); modeled so dispatch-loop wiring has
/// a named seam for credential refresh without the core depending on any
/// particular auth flow.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, BusError>;
}
