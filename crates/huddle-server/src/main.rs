use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_api::middleware::{require_auth, JwtSecret};
use huddle_api::service::GroupChannelService;
use huddle_api::{channel, subscribe, AppState, AppStateInner};
use huddle_bus::{MessageBus, NatsBus};
use huddle_gateway::SubscriptionRegistry;
use huddle_store::Database;

/// Placeholder values that MUST NOT be used as the JWT secret.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    // Config -- the JWT secret shared with the auth service is MANDATORY
    let jwt_secret = std::env::var("HUDDLE_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: HUDDLE_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Generate a strong random value: openssl rand -base64 48");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let db_path = std::env::var("HUDDLE_DB_PATH").unwrap_or_else(|_| "huddle.db".into());
    let host = std::env::var("HUDDLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HUDDLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let nats_url =
        std::env::var("HUDDLE_NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".into());

    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(&nats_url).await?);

    let registry = SubscriptionRegistry::new(bus.clone());
    registry.start();

    let state: AppState = Arc::new(AppStateInner {
        service: GroupChannelService::new(db, bus),
        registry: registry.clone(),
    });

    let jwt_extension = JwtSecret(Arc::from(jwt_secret.as_str()));
    let cors = build_cors_layer();

    let app = Router::new()
        .route(
            "/channel/group",
            post(channel::create_channel).get(channel::get_all_channels),
        )
        .route(
            "/channel/group/{channel_id}",
            get(channel::get_channel_profile),
        )
        .route(
            "/channel/group/{channel_id}/invite",
            post(channel::invite_to_channel),
        )
        .route(
            "/channel/group/{channel_id}/accept",
            post(channel::accept_invitation),
        )
        .route(
            "/channel/group/{channel_id}/kick",
            post(channel::remove_from_channel),
        )
        .route(
            "/channel/group/{channel_id}/leave",
            post(channel::leave_channel),
        )
        .route(
            "/channel/group/{channel_id}/messages",
            post(channel::send_message).get(channel::get_channel_messages),
        )
        .route("/channel/group/subscribe/sse", get(subscribe::subscribe_sse))
        .route("/channel/group/subscribe/ws", get(subscribe::subscribe_ws))
        .layer(middleware::from_fn(require_auth))
        .layer(Extension(jwt_extension))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("huddle server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close every live handle, drop the bus subscriptions, stop dispatch.
    registry.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// CORS for browser clients. Additional origins come from the
/// HUDDLE_CORS_ORIGINS env var (comma-separated list).
fn build_cors_layer() -> CorsLayer {
    let mut origins: Vec<HeaderValue> = vec![
        "http://localhost".parse().unwrap(),
        "http://localhost:3000".parse().unwrap(),
    ];

    if let Ok(extra) = std::env::var("HUDDLE_CORS_ORIGINS") {
        for raw in extra.split(',') {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                if let Ok(value) = trimmed.parse::<HeaderValue>() {
                    origins.push(value);
                } else {
                    eprintln!("WARNING: ignoring invalid CORS origin: {trimmed}");
                }
            }
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}
