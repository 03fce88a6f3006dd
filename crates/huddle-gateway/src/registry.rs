use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use metrics::gauge;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_bus::{subject, BusMessage, BusSubscription, MessageBus};
use huddle_types::dto::GroupMessageDto;
use huddle_types::ChatError;

use crate::dispatch;
use crate::subscriber::Subscriber;

/// Every subscription is force-closed this long after it was opened,
/// regardless of client activity.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(15 * 60);

/// Sum of live handles across all users.
pub const ONLINE_USERS_GAUGE: &str = "chat.group.channel.online.users";

/// Upper bound on concurrent sends per delivered message, so a broadcast
/// storm cannot spawn unbounded work.
const FANOUT_CONCURRENCY: usize = 16;

const INBOUND_CAPACITY: usize = 1024;

/// Per-user map of live transport handles, owning the bus-subscription
/// lifetime: the first handle for a user subscribes the user's group
/// subject, the last one out unsubscribes it.
///
/// All map mutations happen under one async lock held across the paired
/// bus call, so (set change + bus subscribe/unsubscribe) is atomic with
/// respect to other registry operations.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    bus: Arc<dyn MessageBus>,
    users: Mutex<HashMap<Uuid, UserEntry>>,
    inbound_tx: mpsc::Sender<BusMessage>,
    inbound_rx: StdMutex<Option<mpsc::Receiver<BusMessage>>>,
    dispatch: StdMutex<Option<JoinHandle<()>>>,
    session_ttl: Duration,
}

struct UserEntry {
    handles: Vec<Arc<dyn Subscriber>>,
    /// Stops the forwarder task, which unsubscribes the bus subject.
    stop: oneshot::Sender<()>,
}

impl SubscriptionRegistry {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_session_ttl(bus, MAX_SESSION_DURATION)
    }

    /// Like [`SubscriptionRegistry::new`] with a custom session ceiling.
    pub fn with_session_ttl(bus: Arc<dyn MessageBus>, session_ttl: Duration) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                bus,
                users: Mutex::new(HashMap::new()),
                inbound_tx,
                inbound_rx: StdMutex::new(Some(inbound_rx)),
                dispatch: StdMutex::new(None),
                session_ttl,
            }),
        }
    }

    /// Spawn the shared dispatch loop. Idempotent.
    pub fn start(&self) {
        let Some(inbound_rx) = self.inner.inbound_rx.lock().unwrap().take() else {
            return;
        };
        let task = tokio::spawn(dispatch::run(self.clone(), inbound_rx));
        *self.inner.dispatch.lock().unwrap() = Some(task);
    }

    /// Register a live handle for a user. The first handle opens the bus
    /// subscription on the user's group subject; every handle gets a
    /// janitor enforcing the session ceiling and running cleanup once.
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        handle: Arc<dyn Subscriber>,
    ) -> Result<(), ChatError> {
        let count = {
            let mut users = self.inner.users.lock().await;
            match users.entry(user_id) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().handles.push(handle.clone());
                    entry.get().handles.len()
                }
                Entry::Vacant(slot) => {
                    let subscription = self
                        .inner
                        .bus
                        .subscribe(&subject::group_user_subject(user_id))
                        .await
                        .map_err(|e| ChatError::Bus(e.to_string()))?;
                    let (stop_tx, stop_rx) = oneshot::channel();
                    tokio::spawn(forward(subscription, self.inner.inbound_tx.clone(), stop_rx));
                    slot.insert(UserEntry {
                        handles: vec![handle.clone()],
                        stop: stop_tx,
                    });
                    1
                }
            }
        };
        self.update_gauge().await;
        info!("user {user_id} now has {count} active subscriptions");

        let registry = self.clone();
        let session_ttl = self.inner.session_ttl;
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.closed() => {}
                _ = tokio::time::sleep(session_ttl) => {
                    debug!("session ceiling reached for user {user_id}");
                    handle.close().await;
                }
            }
            registry.unsubscribe(user_id, handle.id()).await;
        });
        Ok(())
    }

    /// Remove one handle. When the last handle of a user goes, the bus
    /// subscription is dropped with it. Safe to call repeatedly.
    pub async fn unsubscribe(&self, user_id: Uuid, handle_id: Uuid) {
        let remaining = {
            let mut users = self.inner.users.lock().await;
            let Some(entry) = users.get_mut(&user_id) else {
                return;
            };
            let before = entry.handles.len();
            entry.handles.retain(|handle| handle.id() != handle_id);
            if entry.handles.len() == before {
                return;
            }
            let remaining = entry.handles.len();
            if remaining == 0 {
                if let Some(entry) = users.remove(&user_id) {
                    let _ = entry.stop.send(());
                }
                info!("user {user_id} unsubscribed from group traffic");
            }
            remaining
        };
        self.update_gauge().await;
        info!("user {user_id} now has {remaining} active subscriptions");
    }

    /// Fan a message out to every live handle of a user, in parallel. A
    /// failing handle is closed (its janitor removes it) without
    /// affecting the rest.
    pub async fn deliver(&self, user_id: Uuid, message: &GroupMessageDto) {
        let handles = {
            let users = self.inner.users.lock().await;
            match users.get(&user_id) {
                Some(entry) => entry.handles.clone(),
                None => return,
            }
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to serialize message {}: {err}", message.id);
                return;
            }
        };

        stream::iter(handles)
            .for_each_concurrent(FANOUT_CONCURRENCY, |handle| {
                let text = &text;
                async move {
                    if let Err(err) = handle.send_text(text).await {
                        warn!("dropping subscriber {} of user {user_id}: {err}", handle.id());
                        handle.close().await;
                    }
                }
            })
            .await;
    }

    /// Total live handles, i.e. the current gauge value.
    pub async fn online_sessions(&self) -> usize {
        let users = self.inner.users.lock().await;
        users.values().map(|entry| entry.handles.len()).sum()
    }

    /// Shut the registry down: close every handle, stop every forwarder
    /// (dropping its bus subscription), and end the dispatch loop.
    pub async fn stop(&self) {
        let entries: Vec<(Uuid, UserEntry)> = {
            let mut users = self.inner.users.lock().await;
            users.drain().collect()
        };
        for (user_id, entry) in entries {
            for handle in &entry.handles {
                handle.close().await;
            }
            let _ = entry.stop.send(());
            debug!("dropped subscriptions of user {user_id}");
        }
        gauge!(ONLINE_USERS_GAUGE).set(0.0);

        if let Some(task) = self.inner.dispatch.lock().unwrap().take() {
            task.abort();
        }
    }

    async fn update_gauge(&self) {
        let total = self.online_sessions().await;
        gauge!(ONLINE_USERS_GAUGE).set(total as f64);
    }
}

/// Pump one bus subscription into the shared dispatch channel until the
/// user's last handle unsubscribes.
async fn forward(
    mut subscription: Box<dyn BusSubscription>,
    inbound: mpsc::Sender<BusMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = subscription.next() => match next {
                Some(message) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    if let Err(err) = subscription.unsubscribe().await {
        warn!("bus unsubscribe failed: {err}");
    }
}
