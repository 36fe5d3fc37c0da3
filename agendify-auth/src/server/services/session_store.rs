use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::server::models::{AuthorizationSession, PendingAuthorization};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Authorization sessions keyed by cookie id. The cleanup task stops when
/// the store is dropped.
pub struct SessionStore {
    sessions: Arc<DashMap<String, AuthorizationSession>>,
    _cleanup: DropGuard,
}

impl SessionStore {
    pub fn new(ttl_seconds: u64) -> Self {
        let sessions = Arc::new(DashMap::new());
        let cancellation = CancellationToken::new();

        // Spawn background cleanup task
        tokio::spawn(cleanup_expired_sessions(
            sessions.clone(),
            Duration::from_secs(ttl_seconds),
            cancellation.clone(),
        ));

        tracing::info!(
            "Session store initialized with TTL of {} seconds",
            ttl_seconds
        );
        Self {
            sessions,
            _cleanup: cancellation.drop_guard(),
        }
    }

    /// Record a new authorization attempt and return the session id.
    ///
    /// A known `existing_id` is reused so the browser keeps its cookie, but
    /// its previous state and verifier are overwritten.
    pub fn begin(&self, existing_id: Option<&str>, state: String, code_verifier: String) -> String {
        let session_id = existing_id
            .filter(|id| self.sessions.contains_key(*id))
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let session = AuthorizationSession {
            session_id: session_id.clone(),
            state: Some(state),
            code_verifier: Some(code_verifier),
            created_at: Utc::now(),
        };
        self.sessions.insert(session_id.clone(), session);
        tracing::debug!(session_id = %session_id, "Authorization session started");
        session_id
    }

    /// Clear the pending fields of a session and hand them to the caller.
    ///
    /// The fields are cleared under the entry lock, so two concurrent
    /// callbacks for the same session cannot both obtain the verifier.
    pub fn take(&self, session_id: &str) -> PendingAuthorization {
        self.sessions
            .get_mut(session_id)
            .map(|mut s| PendingAuthorization {
                state: s.state.take(),
                code_verifier: s.code_verifier.take(),
            })
            .unwrap_or_default()
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.is_pending())
            .unwrap_or(false)
    }
}

/// Background task that periodically cleans up expired sessions
async fn cleanup_expired_sessions(
    sessions: Arc<DashMap<String, AuthorizationSession>>,
    ttl: Duration,
    cancellation: CancellationToken,
) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = interval.tick() => {}
        }
        let now = Utc::now();
        let initial_count = sessions.len();

        sessions.retain(|session_id, session| {
            let age = now
                .signed_duration_since(session.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);

            if age >= ttl {
                tracing::debug!(session_id = %session_id, "Cleaning up expired session");
                false
            } else {
                true
            }
        });

        let cleaned = initial_count.saturating_sub(sessions.len());
        if cleaned > 0 {
            tracing::info!(
                "Cleaned up {} expired sessions, {} remaining",
                cleaned,
                sessions.len()
            );
        }
    }
}
