use async_trait::async_trait;
use axum::extract::ws::Message;
use axum::response::sse::Event;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// A live transport endpoint delivering messages to one client session.
///
/// Per handle the lifecycle is `Registered → Active → Closed`; `Closed`
/// is terminal and double-close is a no-op. `closed()` is how the
/// registry's session janitor observes the transition, whatever caused
/// it (client disconnect, send failure, session ceiling, shutdown).
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Stable identity of this handle within the registry.
    fn id(&self) -> Uuid;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the transport. Idempotent.
    async fn close(&self);

    /// Resolves once the handle is closed.
    async fn closed(&self);
}

/// Idempotent, observable close state shared by both transport variants.
struct CloseCell {
    state: watch::Sender<bool>,
}

impl CloseCell {
    fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Returns `true` only for the call that performed the transition.
    fn close(&self) -> bool {
        self.state.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    fn is_closed(&self) -> bool {
        *self.state.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.state.subscribe();
        if *rx.borrow_and_update() {
            return;
        }
        let _ = rx.changed().await;
    }
}

/// Server-sent-events handle. Events flow through an outbound channel
/// into the response stream; the stream ends once every sender is gone.
pub struct SseSubscriber {
    id: Uuid,
    tx: mpsc::Sender<Event>,
    cell: CloseCell,
}

impl SseSubscriber {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            cell: CloseCell::new(),
        }
    }

    /// Initial `connect` event acknowledging the subscription.
    pub async fn send_connect(&self) -> Result<(), TransportError> {
        self.send_event(Event::default().event("connect").data("connected"))
            .await
    }

    async fn send_event(&self, event: Event) -> Result<(), TransportError> {
        if self.cell.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx.send(event).await.map_err(|_| {
            // Receiver gone means the client went away.
            self.cell.close();
            TransportError::Closed
        })
    }
}

#[async_trait]
impl Subscriber for SseSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send_event(Event::default().event("message").data(text))
            .await
    }

    async fn close(&self) {
        self.cell.close();
    }

    async fn closed(&self) {
        tokio::select! {
            _ = self.cell.wait() => {}
            _ = self.tx.closed() => {}
        }
    }
}

/// WebSocket handle. Frames flow through an outbound channel drained by
/// the session's writer task; closing enqueues a Close frame so the
/// socket shuts down cleanly.
pub struct WsSubscriber {
    id: Uuid,
    tx: mpsc::Sender<Message>,
    cell: CloseCell,
}

impl WsSubscriber {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            cell: CloseCell::new(),
        }
    }

    /// Initial `connect` text frame acknowledging the subscription.
    pub async fn send_connect(&self) -> Result<(), TransportError> {
        self.send_frame(Message::Text("connect".into())).await
    }

    async fn send_frame(&self, frame: Message) -> Result<(), TransportError> {
        if self.cell.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| {
            self.cell.close();
            TransportError::Closed
        })
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send_frame(Message::Text(text.to_string().into())).await
    }

    async fn close(&self) {
        if self.cell.close() {
            let _ = self.tx.try_send(Message::Close(None));
        }
    }

    async fn closed(&self) {
        tokio::select! {
            _ = self.cell.wait() => {}
            _ = self.tx.closed() => {}
        }
    }
}
