//! Message-bus abstraction for cross-process chat traffic.
//!
//! Production runs against NATS (`NatsBus`); tests and standalone mode
//! use the in-process `MemoryBus`. Both speak plain subjects carrying
//! UTF-8 JSON payloads.

pub mod memory;
pub mod nats;
pub mod subject;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryBus;
pub use nats::NatsBus;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// A publish/subscribe broker connection.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a subject. Resolves once the broker has
    /// accepted the message; delivery is at-least-once from there.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Open a subscription on a single subject (no wildcards).
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn BusSubscription>>;
}

/// A live subscription on one subject.
#[async_trait]
pub trait BusSubscription: Send {
    /// Next message on this subject; `None` once the subscription closed.
    async fn next(&mut self) -> Option<BusMessage>;

    /// Stop delivery for this subject.
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}
