use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::error::AuthError;

/// Body shared by every rejected callback, whichever check failed.
pub const INVALID_CALLBACK_MESSAGE: &str = "Invalid OAuth callback.";
pub const EXCHANGE_FAILED_MESSAGE: &str = "OAuth token exchange failed.";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid OAuth callback")]
    InvalidCallback,

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Re-authorization required: {0}")]
    ReauthorizationRequired(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // Operator-facing browser responses stay plain text.
            ServerError::InvalidCallback => {
                return (StatusCode::BAD_REQUEST, INVALID_CALLBACK_MESSAGE).into_response();
            }
            ServerError::TokenExchange(_) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, EXCHANGE_FAILED_MESSAGE)
                    .into_response();
            }
            ServerError::ReauthorizationRequired(msg) => (StatusCode::UNAUTHORIZED, msg),
            ServerError::Configuration(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl
    From<
        oauth2::RequestTokenError<
            reqwest::Error,
            oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>,
        >,
    > for ServerError
{
    fn from(
        err: oauth2::RequestTokenError<
            reqwest::Error,
            oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>,
        >,
    ) -> Self {
        let detail = match &err {
            oauth2::RequestTokenError::ServerResponse(response) => {
                format!("provider rejected request: {}", response)
            }
            oauth2::RequestTokenError::Parse(parse_err, body) => format!(
                "unexpected provider response ({}): {}",
                parse_err,
                String::from_utf8_lossy(body)
            ),
            other => other.to_string(),
        };
        ServerError::TokenExchange(detail)
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthorized => ServerError::ReauthorizationRequired(err.to_string()),
            AuthError::ReauthorizationRequired(msg) => ServerError::ReauthorizationRequired(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
