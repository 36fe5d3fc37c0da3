use axum::{
    extract::{Query, State},
    response::Html,
};
use axum_extra::extract::cookie::SignedCookieJar;
use tracing::Instrument;

use crate::server::{error::ServerError, models::CallbackParams, AuthState, SESSION_COOKIE};

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Twitter Connected</title>
    <style>
        body {
            margin: 0;
            padding: 0;
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
        }
        .container {
            text-align: center;
            max-width: 400px;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Twitter Connected!</h1>
        <p>You can now close this window and start promoting.</p>
    </div>
</body>
</html>"#;

pub async fn oauth_callback(
    State(state): State<AuthState>,
    jar: SignedCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<Html<&'static str>, ServerError> {
    let session_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let span = tracing::info_span!(
        "oauth_callback",
        session_id = session_id.as_deref().unwrap_or("<none>")
    );

    state
        .flow
        .complete(session_id.as_deref(), params)
        .instrument(span)
        .await?;

    Ok(Html(SUCCESS_HTML))
}
