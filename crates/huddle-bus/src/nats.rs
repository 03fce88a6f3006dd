//! NATS-backed bus used in production deployments.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::info;

use crate::{BusError, BusMessage, BusSubscription, MessageBus, Result};

pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        info!("connected to NATS at {url}");
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn BusSubscription>> {
        let inner = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        Ok(Box::new(NatsSubscription { inner }))
    }
}

struct NatsSubscription {
    inner: async_nats::Subscriber,
}

#[async_trait]
impl BusSubscription for NatsSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        self.inner.next().await.map(|message| BusMessage {
            subject: message.subject.to_string(),
            payload: message.payload,
        })
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<()> {
        self.inner
            .unsubscribe()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }
}
