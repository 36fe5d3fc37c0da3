use axum::{extract::State, Json};

use crate::server::{models::AuthStatusResponse, AuthState};

pub async fn authorization_status(State(state): State<AuthState>) -> Json<AuthStatusResponse> {
    let tokens = state.flow.tokens().get();

    Json(AuthStatusResponse {
        authorized: tokens.is_some(),
        refreshable: tokens.is_some_and(|t| t.refresh_token.is_some()),
    })
}
