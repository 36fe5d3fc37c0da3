use oauth2::{
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
    AccessToken, AuthorizationCode, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    HttpRequest, HttpResponse, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    StandardRevocableToken, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::common::TokenPair;
use crate::server::config::OAuthConfiguration;
use crate::server::error::ServerError;
use crate::server::pkce;

// Simple async HTTP client for OAuth2
async fn http_client(request: HttpRequest) -> Result<HttpResponse, reqwest::Error> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let mut builder = client
        .request(request.method().clone(), request.uri().to_string())
        .body(request.body().clone());

    for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await?;
    let status = response.status();
    let body = response.bytes().await?.to_vec();

    let mut http_response = HttpResponse::new(body);
    *http_response.status_mut() = status;

    Ok(http_response)
}

/// Token endpoint answer. The provider may leave out `token_type`, which is
/// then taken to be a bearer token.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProviderTokenResponse {
    access_token: AccessToken,
    #[serde(default = "default_token_type")]
    token_type: BasicTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(rename = "scope")]
    #[serde(deserialize_with = "oauth2::helpers::deserialize_space_delimited_vec")]
    #[serde(serialize_with = "oauth2::helpers::serialize_space_delimited_vec")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    scopes: Option<Vec<Scope>>,
}

fn default_token_type() -> BasicTokenType {
    BasicTokenType::Bearer
}

impl TokenResponse for ProviderTokenResponse {
    type TokenType = BasicTokenType;

    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        self.scopes.as_ref()
    }
}

type TokenClient = Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    authorize_url: Url,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    scope: String,
    request_timeout: Duration,
}

impl OAuthClient {
    pub fn new(config: &OAuthConfiguration) -> Result<Self, ServerError> {
        let authorize_url = Url::parse(&config.authorize_url)
            .map_err(|e| ServerError::Configuration(format!("Invalid authorize URL: {}", e)))?;

        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| ServerError::Configuration(format!("Invalid token URL: {}", e)))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| ServerError::Configuration(format!("Invalid redirect URI: {}", e)))?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorize_url,
            token_url,
            redirect_url,
            scope: config.scope.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Provider authorization URL carrying the CSRF `state` and the S256
    /// challenge derived from `code_verifier`. No request is made.
    pub fn build_authorization_url(&self, state: &str, code_verifier: &str) -> String {
        let challenge = pkce::generate_challenge(code_verifier);
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", &self.scope)
            .append_pair("state", state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        url.to_string()
    }

    /// Exchange authorization code for access and refresh tokens
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenPair, ServerError> {
        let client = self.token_client();
        let request = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()))
            .add_extra_param("client_id", self.client_id.clone());

        let token_result =
            tokio::time::timeout(self.request_timeout, request.request_async(&http_client))
                .await
                .map_err(|_| self.timed_out())??;

        let access_token = token_result.access_token().secret().to_string();
        let refresh_token = token_result
            .refresh_token()
            .map(|token| token.secret().to_string());

        if refresh_token.is_none() {
            tracing::warn!("Provider returned no refresh token; refresh will be unavailable");
        }

        tracing::debug!("Successfully exchanged code for tokens");

        Ok(TokenPair::new(access_token, refresh_token))
    }

    /// Redeem a refresh token for a new pair. The old refresh token is kept
    /// when the provider does not rotate it.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenPair, ServerError> {
        let client = self.token_client();
        let refresh = RefreshToken::new(refresh_token.to_string());
        let request = client
            .exchange_refresh_token(&refresh)
            .add_extra_param("client_id", self.client_id.clone());

        let token_result =
            tokio::time::timeout(self.request_timeout, request.request_async(&http_client))
                .await
                .map_err(|_| self.timed_out())??;

        let access_token = token_result.access_token().secret().to_string();
        let refresh_token = token_result
            .refresh_token()
            .map(|token| token.secret().to_string())
            .unwrap_or_else(|| refresh_token.to_string());

        tracing::debug!("Successfully refreshed tokens");

        Ok(TokenPair::new(access_token, Some(refresh_token)))
    }

    fn token_client(&self) -> TokenClient {
        Client::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone())
    }

    fn timed_out(&self) -> ServerError {
        ServerError::TokenExchange(format!(
            "token endpoint did not answer within {}s",
            self.request_timeout.as_secs()
        ))
    }
}
