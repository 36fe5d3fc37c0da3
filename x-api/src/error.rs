use serde::{Deserialize, Serialize};
use tower_api_client::{Error as ApiError, StatusCode};

#[derive(Debug)]
pub enum XApiError {
    Api(StatusCode, ErrorDetail),
    Internal(ApiError),
}

impl XApiError {
    /// True when the provider rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, XApiError::Api(status, _) if *status == StatusCode::UNAUTHORIZED)
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            XApiError::Api(status, _) => Some(*status),
            XApiError::Internal(_) => None,
        }
    }
}

impl From<ApiError> for XApiError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::ClientError(status, body) | ApiError::ServerError(status, body) => {
                XApiError::Api(status, ErrorDetail::from_body(status, &body))
            }
            e => XApiError::Internal(e),
        }
    }
}

impl std::fmt::Display for XApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XApiError::Internal(e) => write!(f, "Internal error: {}", e),
            XApiError::Api(status, detail) => match &detail.detail {
                Some(text) => write!(f, "({}) {}: {}", status, detail.title, text),
                None => write!(f, "({}) {}", status, detail.title),
            },
        }
    }
}

impl std::error::Error for XApiError {}

/// Problem-details body returned by the v2 API on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub title: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl ErrorDetail {
    fn from_body(status: StatusCode, body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            title: status
                .canonical_reason()
                .unwrap_or("Unexpected response")
                .to_string(),
            detail: (!body.is_empty()).then(|| body.to_string()),
            kind: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_problem_details_body() {
        let body = r#"{"title":"Unauthorized","type":"about:blank","status":401,"detail":"Unauthorized"}"#;
        let detail = ErrorDetail::from_body(StatusCode::UNAUTHORIZED, body);
        assert_eq!(detail.title, "Unauthorized");
        assert_eq!(detail.kind.as_deref(), Some("about:blank"));
    }

    #[test]
    fn falls_back_to_raw_body() {
        let detail = ErrorDetail::from_body(StatusCode::FORBIDDEN, "nope");
        assert_eq!(detail.title, "Forbidden");
        assert_eq!(detail.detail.as_deref(), Some("nope"));
    }

    #[test]
    fn unauthorized_is_detected() {
        let err = XApiError::Api(
            StatusCode::UNAUTHORIZED,
            ErrorDetail::from_body(StatusCode::UNAUTHORIZED, ""),
        );
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }
}
