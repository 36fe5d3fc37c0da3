pub mod config;
pub mod error;
pub mod flow;
pub mod handlers;
pub mod models;
pub mod pkce;
pub mod services;

pub use config::OAuthConfiguration;
pub use error::ServerError;
pub use flow::{AuthorizationFlow, AuthorizationRedirect};

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use std::sync::Arc;

/// Cookie carrying the authorization session id, signed with the session key.
pub const SESSION_COOKIE: &str = "agendify_session";

pub const START_PATH: &str = "/auth/twitter";
pub const CALLBACK_PATH: &str = "/api/auth/twitter/callback2";
pub const STATUS_PATH: &str = "/api/auth/twitter/status";
pub const REFRESH_PATH: &str = "/api/auth/twitter/refresh";

#[derive(Clone)]
pub struct AuthState {
    pub flow: Arc<AuthorizationFlow>,
    pub cookie_key: Key,
}

impl FromRef<AuthState> for Key {
    fn from_ref(state: &AuthState) -> Self {
        state.cookie_key.clone()
    }
}

/// Derive the cookie signing key from the configured session secret, or make
/// a random one (sessions then end with the process).
pub fn cookie_key(session_secret: Option<&str>) -> Key {
    match session_secret {
        Some(secret) if !secret.is_empty() => {
            Key::from(Sha512::digest(secret.as_bytes()).as_slice())
        }
        _ => {
            tracing::warn!("No session secret configured, generating an ephemeral signing key");
            Key::generate()
        }
    }
}

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route(START_PATH, get(handlers::start_authorization))
        .route(CALLBACK_PATH, get(handlers::oauth_callback))
        .route(STATUS_PATH, get(handlers::authorization_status))
        .route(REFRESH_PATH, post(handlers::refresh_token))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::services::{OAuthClient, SessionStore};
    use crate::token_store::TokenStore;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_against(server: &MockServer) -> AuthState {
        let mut config = OAuthConfiguration::with_credentials("client-123", "secret-456");
        config.token_url = format!("{}/2/oauth2/token", server.uri());

        AuthState {
            flow: Arc::new(AuthorizationFlow::new(
                Arc::new(SessionStore::new(600)),
                Arc::new(OAuthClient::new(&config).unwrap()),
                Arc::new(TokenStore::in_memory()),
            )),
            cookie_key: cookie_key(Some("test-session-secret")),
        }
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Hits the start endpoint and returns (cookie header, provider state).
    async fn begin(app: &Router) -> (String, String) {
        let response = app
            .clone()
            .oneshot(Request::get(START_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let params: HashMap<String, String> =
            Url::parse(location).unwrap().query_pairs().into_owned().collect();
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        let cookie = set_cookie.split(';').next().unwrap().to_string();

        (cookie, params["state"].clone())
    }

    fn callback_request(cookie: &str, code: &str, state: &str) -> Request<Body> {
        Request::get(format!("{}?code={}&state={}", CALLBACK_PATH, code, state))
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn start_redirects_with_302_and_sets_cookie() {
        let server = MockServer::start().await;
        let app = router(state_against(&server));

        let (cookie, state) = begin(&app).await;
        assert!(cookie.starts_with(SESSION_COOKIE));
        assert!(!state.is_empty());
    }

    #[tokio::test]
    async fn full_browser_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "bearer",
                "access_token": "AT1",
                "refresh_token": "RT1"
            })))
            .mount(&server)
            .await;

        let state = state_against(&server);
        let tokens = state.flow.tokens().clone();
        let app = router(state);

        let (cookie, provider_state) = begin(&app).await;
        let response = app
            .clone()
            .oneshot(callback_request(&cookie, "abc", &provider_state))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Twitter Connected!"));
        assert_eq!(tokens.get().unwrap().access_token, "AT1");

        let replay = app
            .oneshot(callback_request(&cookie, "abc", &provider_state))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forged_state_and_missing_cookie_look_the_same() {
        let server = MockServer::start().await;
        let app = router(state_against(&server));
        let (cookie, _) = begin(&app).await;

        let forged = app
            .clone()
            .oneshot(callback_request(&cookie, "abc", "forged"))
            .await
            .unwrap();
        let no_cookie = app
            .oneshot(
                Request::get(format!("{}?code=abc&state=x", CALLBACK_PATH))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(forged.status(), StatusCode::BAD_REQUEST);
        assert_eq!(no_cookie.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(forged).await, body_text(no_cookie).await);
    }

    #[tokio::test]
    async fn provider_failure_is_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let state = state_against(&server);
        let tokens = state.flow.tokens().clone();
        let app = router(state);

        let (cookie, provider_state) = begin(&app).await;
        let response = app
            .oneshot(callback_request(&cookie, "abc", &provider_state))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(tokens.get().is_none());
    }

    #[tokio::test]
    async fn status_reports_authorization() {
        let server = MockServer::start().await;
        let state = state_against(&server);
        let tokens = state.flow.tokens().clone();
        let app = router(state);

        let before = app
            .clone()
            .oneshot(Request::get(STATUS_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_text(before).await,
            r#"{"authorized":false,"refreshable":false}"#
        );

        tokens
            .set(crate::common::TokenPair::new("AT", Some("RT".into())))
            .unwrap();
        let after = app
            .oneshot(Request::get(STATUS_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_text(after).await,
            r#"{"authorized":true,"refreshable":true}"#
        );
    }

    #[tokio::test]
    async fn refresh_without_tokens_is_401() {
        let server = MockServer::start().await;
        let app = router(state_against(&server));

        let response = app
            .oneshot(Request::post(REFRESH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn same_secret_gives_same_key() {
        let a = cookie_key(Some("secret"));
        let b = cookie_key(Some("secret"));
        assert_eq!(a.master(), b.master());
    }
}
