pub mod channel;
pub mod error;
pub mod middleware;
pub mod retry;
pub mod service;
pub mod subscribe;

use std::sync::Arc;

use huddle_gateway::SubscriptionRegistry;
use service::GroupChannelService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: GroupChannelService,
    pub registry: SubscriptionRegistry,
}
