use axum::{extract::State, Json};

use crate::server::{error::ServerError, models::RefreshResponse, AuthState};

pub async fn refresh_token(
    State(state): State<AuthState>,
) -> Result<Json<RefreshResponse>, ServerError> {
    tracing::debug!("Token refresh requested");

    state.flow.refresh().await?;

    Ok(Json(RefreshResponse { refreshed: true }))
}
