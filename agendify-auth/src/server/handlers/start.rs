use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};

use crate::server::{AuthState, SESSION_COOKIE};

pub async fn start_authorization(
    State(state): State<AuthState>,
    jar: SignedCookieJar,
) -> impl IntoResponse {
    let existing = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let redirect = state.flow.start(existing.as_deref());

    let cookie = Cookie::build((SESSION_COOKIE, redirect.session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    (
        jar.add(cookie),
        (StatusCode::FOUND, [(header::LOCATION, redirect.url)]),
    )
}
