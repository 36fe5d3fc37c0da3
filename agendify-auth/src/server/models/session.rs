use chrono::{DateTime, Utc};

/// Per-browser record of an authorization attempt.
///
/// `state` and `code_verifier` are set together when the redirect is issued
/// and cleared together the first time a callback is seen.
#[derive(Debug, Clone)]
pub struct AuthorizationSession {
    pub session_id: String,
    pub state: Option<String>,
    pub code_verifier: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationSession {
    pub fn is_pending(&self) -> bool {
        self.state.is_some() && self.code_verifier.is_some()
    }
}

/// The secrets taken out of a session by a callback.
#[derive(Debug, Clone, Default)]
pub struct PendingAuthorization {
    pub state: Option<String>,
    pub code_verifier: Option<String>,
}
