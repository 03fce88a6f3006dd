//! Fan-out core: the per-user subscription registry, the shared bus
//! dispatch loop, and the SSE/WebSocket subscriber handles.

mod dispatch;
pub mod registry;
pub mod subscriber;

pub use registry::{SubscriptionRegistry, MAX_SESSION_DURATION, ONLINE_USERS_GAUGE};
pub use subscriber::{SseSubscriber, Subscriber, TransportError, WsSubscriber};
