use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Extension,
};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_gateway::{SseSubscriber, Subscriber, WsSubscriber};

use crate::error::ApiError;
use crate::middleware::Claims;
use crate::AppState;

/// Outbound frames buffered per session before sends start blocking.
const OUTBOUND_CAPACITY: usize = 64;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Server-sent-events subscription: a `connect` event up front, then one
/// `message` event per delivered `GroupMessageDto`. The stream completes
/// silently when the session hits its ceiling.
pub async fn subscribe_sse(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.service.ensure_user(claims.sub)?;

    let (tx, rx) = mpsc::channel::<Event>(OUTBOUND_CAPACITY);
    let handle = Arc::new(SseSubscriber::new(tx));
    state.registry.subscribe(claims.sub, handle.clone()).await?;

    if let Err(err) = handle.send_connect().await {
        warn!("connect event to user {} failed: {err}", claims.sub);
    }

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}

/// WebSocket subscription: a `connect` text frame up front, then one text
/// frame per delivered `GroupMessageDto`.
pub async fn subscribe_ws(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    state.service.ensure_user(claims.sub)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut sink, mut source) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let handle = Arc::new(WsSubscriber::new(tx));

    if let Err(err) = state.registry.subscribe(user_id, handle.clone()).await {
        warn!("websocket subscribe for user {user_id} failed: {err}");
        return;
    }
    if let Err(err) = handle.send_connect().await {
        warn!("connect frame to user {user_id} failed: {err}");
    }

    // Writer: registry deliveries -> socket. Ends on the Close frame that
    // `close()` enqueues, on send failure, or when the handle closes
    // without managing to enqueue one.
    let writer_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let closing = matches!(frame, Message::Close(_));
                    if sink.send(frame).await.is_err() || closing {
                        break;
                    }
                }
                _ = writer_handle.closed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader: watch for the client going away. Inbound text is not part
    // of the protocol and is ignored.
    let reader_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = source.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        reader_handle.close().await;
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    handle.close().await;
    debug!("websocket session of user {user_id} finished");
}
