use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfiguration {
    /// Empty until provisioned; the provider then rejects the exchange.
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Space-delimited, sent verbatim as the `scope` parameter.
    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// When set, the token pair is also written here and reloaded at startup.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_redirect_uri() -> String {
    "https://agendifyx.up.railway.app/api/auth/twitter/callback2".to_string()
}

fn default_authorize_url() -> String {
    "https://twitter.com/i/oauth2/authorize".to_string()
}

fn default_token_url() -> String {
    "https://api.twitter.com/2/oauth2/token".to_string()
}

fn default_scope() -> String {
    "tweet.read tweet.write users.read".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for OAuthConfiguration {
    fn default() -> Self {
        Self::with_credentials(String::new(), String::new())
    }
}

impl OAuthConfiguration {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Configuration with the built-in endpoints and the given credentials.
    pub fn with_credentials(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: default_redirect_uri(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scope: default_scope(),
            request_timeout_seconds: default_request_timeout(),
            token_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_endpoints_but_no_credentials() {
        let config = OAuthConfiguration::default();
        assert!(config.client_id.is_empty());
        assert!(config.client_secret.is_empty());
        assert_eq!(config.token_url, "https://api.twitter.com/2/oauth2/token");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
