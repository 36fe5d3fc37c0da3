use agendify_auth::{AuthError, TokenStore};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use x_api::{Client, Request, XApiError};

use crate::queue::{JobHandler, ScheduledJob};

pub const PUBLISH_POST: &str = "publish post";

/// Payload of a `publish post` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishPost {
    pub text: String,
    /// Content item the post was created from, for log correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl PublishPost {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            agenda_id: None,
            media_ids: Vec::new(),
            in_reply_to: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("provider rejected the access token")]
    Unauthorized,

    #[error("provider API error: {0}")]
    Api(String),
}

impl From<XApiError> for PublishError {
    fn from(value: XApiError) -> Self {
        if value.is_unauthorized() {
            PublishError::Unauthorized
        } else {
            PublishError::Api(value.to_string())
        }
    }
}

/// Creates posts on the provider on behalf of the authorized account.
#[async_trait]
pub trait PostPublisher: Send + Sync {
    /// Returns the id of the created post.
    async fn publish(&self, access_token: &str, post: &PublishPost) -> Result<String, PublishError>;
}

pub struct XPublisher {
    base_url: String,
}

impl XPublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PostPublisher for XPublisher {
    async fn publish(&self, access_token: &str, post: &PublishPost) -> Result<String, PublishError> {
        let client = Client::with_base_url(&self.base_url, access_token);

        let mut request = Request::posts()
            .create(post.text.clone())
            .media_ids(post.media_ids.iter().cloned());
        if let Some(parent) = &post.in_reply_to {
            request = request.in_reply_to(parent.as_str());
        }

        let response = client.send(request).await?;
        Ok(response.data.id.to_string())
    }
}

pub struct PublishPostJob {
    tokens: Arc<TokenStore>,
    publisher: Arc<dyn PostPublisher>,
}

impl PublishPostJob {
    pub fn new(tokens: Arc<TokenStore>, publisher: Arc<dyn PostPublisher>) -> Self {
        Self { tokens, publisher }
    }
}

#[async_trait]
impl JobHandler for PublishPostJob {
    async fn run(&self, job: ScheduledJob) -> anyhow::Result<()> {
        let post: PublishPost = job.payload().context("invalid publish post data")?;
        let tokens = self.tokens.require()?;

        match self.publisher.publish(&tokens.access_token, &post).await {
            Ok(post_id) => {
                tracing::info!(
                    post_id = %post_id,
                    agenda_id = post.agenda_id.as_deref().unwrap_or("-"),
                    "Post published"
                );
                Ok(())
            }
            Err(PublishError::Unauthorized) => Err(AuthError::ReauthorizationRequired(
                "the provider rejected the stored access token".to_string(),
            )
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}
