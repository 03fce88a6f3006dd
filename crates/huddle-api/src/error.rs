use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use huddle_types::ChatError;

/// Response wrapper mapping the domain taxonomy onto HTTP statuses.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ChatError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            ChatError::UserDoesNotExist | ChatError::ChannelDoesNotExist => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            ChatError::InvalidOperation(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            ChatError::Conflict => (
                StatusCode::CONFLICT,
                "operation conflicted, please retry".to_string(),
            ),
            ChatError::Storage(_) | ChatError::Bus(_) => {
                error!("internal failure: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
