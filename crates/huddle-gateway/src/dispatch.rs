use tokio::sync::mpsc;
use tracing::{debug, warn};

use huddle_bus::{subject, BusMessage};
use huddle_types::dto::GroupMessageDto;

use crate::registry::SubscriptionRegistry;

/// The shared bus-message handler: decode the subject to a user, decode
/// the payload, fan out. Undecodable messages are logged and dropped;
/// the bus does not redeliver them.
pub(crate) async fn run(registry: SubscriptionRegistry, mut inbound: mpsc::Receiver<BusMessage>) {
    while let Some(message) = inbound.recv().await {
        let Some(user_id) = subject::user_of_group_subject(&message.subject) else {
            warn!("ignoring message on unexpected subject {}", message.subject);
            continue;
        };
        let dto: GroupMessageDto = match serde_json::from_slice(&message.payload) {
            Ok(dto) => dto,
            Err(err) => {
                warn!("dropping undecodable message on {}: {err}", message.subject);
                continue;
            }
        };
        registry.deliver(user_id, &dto).await;
    }
    debug!("group dispatch loop stopped");
}
