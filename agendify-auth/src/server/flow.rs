use std::sync::Arc;

use crate::server::{
    error::ServerError,
    models::CallbackParams,
    pkce,
    services::{OAuthClient, SessionStore},
};
use crate::token_store::TokenStore;

/// Where to send the browser, and the session that now holds the secrets.
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    pub session_id: String,
    pub url: String,
}

/// Authorization-code-with-PKCE flow.
///
/// `start` moves a browser session to pending; `complete` consumes the
/// pending secrets exactly once and, when they check out, redeems the code and
/// overwrites the token store. Any failure leaves the session idle and the
/// token store untouched.
pub struct AuthorizationFlow {
    sessions: Arc<SessionStore>,
    oauth_client: Arc<OAuthClient>,
    tokens: Arc<TokenStore>,
}

impl AuthorizationFlow {
    pub fn new(
        sessions: Arc<SessionStore>,
        oauth_client: Arc<OAuthClient>,
        tokens: Arc<TokenStore>,
    ) -> Self {
        Self {
            sessions,
            oauth_client,
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn start(&self, existing_session: Option<&str>) -> AuthorizationRedirect {
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_verifier();
        let url = self
            .oauth_client
            .build_authorization_url(&state, &code_verifier);
        let session_id = self.sessions.begin(existing_session, state, code_verifier);

        tracing::info!(session_id = %session_id, "Redirecting to provider for authorization");

        AuthorizationRedirect { session_id, url }
    }

    pub async fn complete(
        &self,
        session_id: Option<&str>,
        params: CallbackParams,
    ) -> Result<(), ServerError> {
        // Single use: whatever happens next, this session is no longer pending.
        let pending = session_id
            .map(|id| self.sessions.take(id))
            .unwrap_or_default();

        if let Some(error) = &params.error {
            tracing::warn!(error = %error, "Provider returned an error to the callback");
        }

        let state_matches = match (&pending.state, &params.state) {
            (Some(expected), Some(presented)) => pkce::tokens_match(expected, presented),
            _ => false,
        };
        let code = params.code.filter(|code| !code.is_empty());
        let verifier = pending.code_verifier.filter(|v| !v.is_empty());

        let (Some(code), true, Some(verifier)) = (code, state_matches, verifier) else {
            tracing::warn!("Rejected OAuth callback");
            return Err(ServerError::InvalidCallback);
        };

        let tokens = match self
            .oauth_client
            .exchange_code_for_token(&code, &verifier)
            .await
        {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::error!(error = %err, "Error exchanging token");
                return Err(err);
            }
        };

        if let Err(err) = self.tokens.set(tokens) {
            tracing::error!(error = %err, "Tokens updated in memory but not persisted");
        }

        tracing::info!("Authorization completed, tokens stored");
        Ok(())
    }

    /// Redeem the stored refresh token. Runs only when asked to; an expired
    /// access token is never refreshed behind the operator's back.
    pub async fn refresh(&self) -> Result<(), ServerError> {
        let current = self.tokens.require()?;
        let refresh_token = current.refresh_token.ok_or_else(|| {
            ServerError::ReauthorizationRequired("no refresh token was granted".to_string())
        })?;

        let tokens = self
            .oauth_client
            .refresh_access_token(&refresh_token)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "Token refresh failed"))?;

        if let Err(err) = self.tokens.set(tokens) {
            tracing::error!(error = %err, "Refreshed tokens not persisted");
        }

        tracing::info!("Token refresh successful");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TokenPair;
    use crate::server::config::OAuthConfiguration;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::json;
    use std::collections::HashMap;
    use url::Url;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/2/oauth2/token";

    fn flow_against(server: &MockServer) -> AuthorizationFlow {
        let mut config = OAuthConfiguration::with_credentials("client-123", "secret-456");
        config.token_url = format!("{}{}", server.uri(), TOKEN_PATH);
        config.request_timeout_seconds = 5;

        AuthorizationFlow::new(
            Arc::new(SessionStore::new(600)),
            Arc::new(OAuthClient::new(&config).unwrap()),
            Arc::new(TokenStore::in_memory()),
        )
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    fn callback(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            error: None,
        }
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        json!({
            "token_type": "bearer",
            "expires_in": 7200,
            "access_token": access,
            "refresh_token": refresh,
            "scope": "tweet.read tweet.write users.read"
        })
    }

    #[tokio::test]
    async fn successful_callback_stores_tokens() {
        let server = MockServer::start().await;
        let basic = format!("Basic {}", STANDARD.encode("client-123:secret-456"));
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(header("authorization", basic.as_str()))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("client_id=client-123"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1")))
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let redirect = flow.start(None);
        let state = query(&redirect.url)["state"].clone();

        flow.complete(Some(&redirect.session_id), callback("abc", &state))
            .await
            .unwrap();

        let tokens = flow.tokens().get().unwrap();
        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
    }

    #[tokio::test]
    async fn callback_accepts_response_without_token_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"access_token":"AT1","refresh_token":"RT1"}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let redirect = flow.start(None);
        let state = query(&redirect.url)["state"].clone();

        flow.complete(Some(&redirect.session_id), callback("abc", &state))
            .await
            .unwrap();

        let tokens = flow.tokens().get().unwrap();
        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
    }

    #[tokio::test]
    async fn verifier_sent_matches_challenge_in_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT", "RT")))
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let redirect = flow.start(None);
        let params = query(&redirect.url);

        flow.complete(Some(&redirect.session_id), callback("abc", &params["state"]))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let form: HashMap<String, String> = url::form_urlencoded::parse(&requests[0].body)
            .into_owned()
            .collect();
        assert_eq!(
            pkce::generate_challenge(&form["code_verifier"]),
            params["code_challenge"]
        );
        assert_eq!(
            form["redirect_uri"],
            "https://agendifyx.up.railway.app/api/auth/twitter/callback2"
        );
    }

    #[tokio::test]
    async fn forged_state_is_rejected_without_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT", "RT")))
            .expect(0)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let redirect = flow.start(None);

        let result = flow
            .complete(Some(&redirect.session_id), callback("abc", "forged"))
            .await;

        assert!(matches!(result, Err(ServerError::InvalidCallback)));
        assert!(flow.tokens().get().is_none());
        assert!(!flow.sessions().is_pending(&redirect.session_id));
    }

    #[tokio::test]
    async fn replayed_callback_fails_second_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1")))
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let redirect = flow.start(None);
        let state = query(&redirect.url)["state"].clone();

        flow.complete(Some(&redirect.session_id), callback("abc", &state))
            .await
            .unwrap();
        let replay = flow
            .complete(Some(&redirect.session_id), callback("abc", &state))
            .await;

        assert!(matches!(replay, Err(ServerError::InvalidCallback)));
    }

    #[tokio::test]
    async fn provider_rejection_leaves_tokens_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "unauthorized_client",
                "error_description": "Missing valid authorization header"
            })))
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let previous = TokenPair::new("OLD", Some("OLD-RT".to_string()));
        flow.tokens().set(previous.clone()).unwrap();

        let redirect = flow.start(None);
        let state = query(&redirect.url)["state"].clone();
        let result = flow
            .complete(Some(&redirect.session_id), callback("abc", &state))
            .await;

        assert!(matches!(result, Err(ServerError::TokenExchange(_))));
        assert_eq!(flow.tokens().get(), Some(previous));
        assert!(!flow.sessions().is_pending(&redirect.session_id));
    }

    #[tokio::test]
    async fn missing_code_clears_session() {
        let server = MockServer::start().await;
        let flow = flow_against(&server);
        let redirect = flow.start(None);
        let state = query(&redirect.url)["state"].clone();

        let params = CallbackParams {
            code: None,
            state: Some(state),
            error: Some("access_denied".to_string()),
        };
        let result = flow.complete(Some(&redirect.session_id), params).await;

        assert!(matches!(result, Err(ServerError::InvalidCallback)));
        assert!(!flow.sessions().is_pending(&redirect.session_id));
    }

    #[tokio::test]
    async fn callback_without_session_is_rejected() {
        let server = MockServer::start().await;
        let flow = flow_against(&server);
        let redirect = flow.start(None);
        let state = query(&redirect.url)["state"].clone();

        let result = flow.complete(None, callback("abc", &state)).await;

        assert!(matches!(result, Err(ServerError::InvalidCallback)));
        // The real session is still waiting for its own callback.
        assert!(flow.sessions().is_pending(&redirect.session_id));
    }

    #[tokio::test]
    async fn restart_invalidates_previous_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT", "RT")))
            .expect(0)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        let first = flow.start(None);
        let stale_state = query(&first.url)["state"].clone();
        let second = flow.start(Some(&first.session_id));
        assert_eq!(first.session_id, second.session_id);

        let result = flow
            .complete(Some(&second.session_id), callback("abc", &stale_state))
            .await;
        assert!(matches!(result, Err(ServerError::InvalidCallback)));
    }

    #[tokio::test]
    async fn refresh_replaces_stored_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=RT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2")))
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        flow.tokens()
            .set(TokenPair::new("AT1", Some("RT1".to_string())))
            .unwrap();

        flow.refresh().await.unwrap();

        let tokens = flow.tokens().get().unwrap();
        assert_eq!(tokens.access_token, "AT2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT2"));
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"access_token":"AT2"}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_against(&server);
        flow.tokens()
            .set(TokenPair::new("AT1", Some("RT1".to_string())))
            .unwrap();

        flow.refresh().await.unwrap();

        let tokens = flow.tokens().get().unwrap();
        assert_eq!(tokens.access_token, "AT2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
    }

    #[tokio::test]
    async fn refresh_without_tokens_requires_authorization() {
        let server = MockServer::start().await;
        let flow = flow_against(&server);

        assert!(matches!(
            flow.refresh().await,
            Err(ServerError::ReauthorizationRequired(_))
        ));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_requires_authorization() {
        let server = MockServer::start().await;
        let flow = flow_against(&server);
        flow.tokens().set(TokenPair::new("AT", None)).unwrap();

        assert!(matches!(
            flow.refresh().await,
            Err(ServerError::ReauthorizationRequired(_))
        ));
    }
}
