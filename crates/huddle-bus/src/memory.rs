//! In-process bus on a tokio broadcast channel, for standalone mode and
//! tests. Subject filtering happens on the subscriber side; the
//! per-subject subscription count is observable so tests can assert the
//! subscribe/unsubscribe lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

use crate::{BusError, BusMessage, BusSubscription, MessageBus, Result};

const CHANNEL_CAPACITY: usize = 1024;

pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    active: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live subscriptions on a subject.
    pub fn active_subscriptions(&self, subject: &str) -> usize {
        self.active
            .lock()
            .unwrap()
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    /// Total live subscriptions across all subjects.
    pub fn total_subscriptions(&self) -> usize {
        self.active.lock().unwrap().values().sum()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        // No subscribers is not an error, as with a real broker.
        let _ = self.sender.send(BusMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn BusSubscription>> {
        let receiver = self.sender.subscribe();
        *self
            .active
            .lock()
            .unwrap()
            .entry(subject.to_string())
            .or_insert(0) += 1;
        Ok(Box::new(MemorySubscription {
            subject: subject.to_string(),
            receiver,
            active: self.active.clone(),
            released: false,
        }))
    }
}

struct MemorySubscription {
    subject: String,
    receiver: broadcast::Receiver<BusMessage>,
    active: Arc<Mutex<HashMap<String, usize>>>,
    released: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(&self.subject) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.subject);
            }
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.subject == self.subject => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("in-process bus subscriber lagged by {n} messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<()> {
        self.release();
        Ok(())
    }
}
