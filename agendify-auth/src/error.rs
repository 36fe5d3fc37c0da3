use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Not authorized yet: complete the authorization flow first")]
    NotAuthorized,

    #[error("Re-authorization required: {0}")]
    ReauthorizationRequired(String),

    #[error("Token storage error: {0}")]
    TokenStorage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
