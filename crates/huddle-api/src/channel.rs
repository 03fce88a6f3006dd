use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use huddle_types::dto::PageRequest;

use crate::error::ApiError;
use crate::middleware::Claims;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUserRequest {
    pub target_user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only channels updated at or after this instant; defaults to epoch.
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .service
        .create_channel(&claims.sub.to_string(), &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_all_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let since = query.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let slice = state
        .service
        .get_all_channels(
            &claims.sub.to_string(),
            since,
            PageRequest {
                page: query.page,
                size: query.size,
            },
        )
        .await?;
    Ok(Json(slice))
}

pub async fn get_channel_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .service
        .get_channel_profile(&claims.sub.to_string(), &channel_id)
        .await?;
    Ok(Json(profile))
}

pub async fn invite_to_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
    Json(req): Json<TargetUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .service
        .invite_to_channel(&claims.sub.to_string(), &req.target_user_id, &channel_id)
        .await?;
    Ok(Json(message))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .service
        .accept_invitation(&claims.sub.to_string(), &channel_id)
        .await?;
    Ok(Json(message))
}

pub async fn remove_from_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
    Json(req): Json<TargetUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .service
        .remove_from_channel(&claims.sub.to_string(), &req.target_user_id, &channel_id)
        .await?;
    Ok(Json(message))
}

pub async fn leave_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .service
        .leave_channel(&claims.sub.to_string(), &channel_id)
        .await?;
    Ok(Json(message))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .service
        .send_message(&claims.sub.to_string(), &channel_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_channel_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let slice = state
        .service
        .get_channel_messages(
            &claims.sub.to_string(),
            &channel_id,
            PageRequest {
                page: query.page,
                size: query.size,
            },
        )
        .await?;
    Ok(Json(slice))
}
