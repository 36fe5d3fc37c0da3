use chrono::{serde::ts_seconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credentials returned by a successful code exchange or refresh.
///
/// Both tokens are opaque. Provider-side expiry is not tracked; callers that
/// get an authentication failure must ask the operator to authorize again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Absent when the provider did not grant offline access.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(with = "ts_seconds")]
    pub obtained_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            obtained_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let pair = TokenPair::new("AT1", Some("RT1".to_string()));
        let printed = format!("{:?}", pair);
        assert!(!printed.contains("AT1"));
        assert!(!printed.contains("RT1"));
    }

    #[test]
    fn missing_refresh_token_deserializes() {
        let pair: TokenPair =
            serde_json::from_str(r#"{"access_token":"AT","obtained_at":1700000000}"#).unwrap();
        assert_eq!(pair.refresh_token, None);
    }
}
