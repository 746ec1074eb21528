use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors a handler turns into an inline JSON message.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Movie service unavailable: {0}")]
    Upstream(String),

    #[error("Too many requests")]
    RateLimited,
}

impl ApiError {
    /// Provider failures keep their detail in the logs, not the response.
    pub fn upstream(context: &str, err: anyhow::Error) -> Self {
        tracing::warn!("{}: {:#}", context, err);
        ApiError::Upstream(context.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
