use super::PostId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tower_api_client::{Method, Request, RequestData};

// Requests

#[derive(Default, Debug, Clone, Serialize)]
pub struct CreatePost {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplySettings {
    pub in_reply_to_tweet_id: PostId,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaSettings {
    pub media_ids: Vec<String>,
}

impl CreatePost {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn in_reply_to(mut self, post_id: impl Into<PostId>) -> Self {
        self.reply = Some(ReplySettings {
            in_reply_to_tweet_id: post_id.into(),
        });
        self
    }

    pub fn media_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let media_ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        self.media = (!media_ids.is_empty()).then_some(MediaSettings { media_ids });
        self
    }
}

impl Request for CreatePost {
    type Data = Self;
    type Response = CreatePostResponse;
    const METHOD: Method = Method::POST;

    fn endpoint(&self) -> Cow<'_, str> {
        "/tweets".into()
    }

    fn data(&self) -> RequestData<&Self::Data> {
        RequestData::Json(self)
    }
}

// Responses

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub data: CreatedPost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPost {
    pub id: PostId,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_post_serializes_text_only() {
        let body = serde_json::to_value(CreatePost::new("hello")).unwrap();
        assert_eq!(body, json!({ "text": "hello" }));
    }

    #[test]
    fn reply_with_media() {
        let req = CreatePost::new("thread")
            .in_reply_to("1460323737035677698")
            .media_ids(["1455952740635586573"]);
        let body = serde_json::to_value(req).unwrap();
        assert_eq!(
            body,
            json!({
                "text": "thread",
                "reply": { "in_reply_to_tweet_id": "1460323737035677698" },
                "media": { "media_ids": ["1455952740635586573"] },
            })
        );
    }

    #[test]
    fn empty_media_list_is_omitted() {
        let body = serde_json::to_value(CreatePost::new("x").media_ids(Vec::<String>::new())).unwrap();
        assert!(body.get("media").is_none());
    }

    #[test]
    fn parses_create_response() {
        let res: CreatePostResponse = serde_json::from_value(json!({
            "data": { "id": "1445880548472328192", "text": "Hello world!" }
        }))
        .unwrap();
        assert_eq!(res.data.id.as_str(), "1445880548472328192");
    }
}
