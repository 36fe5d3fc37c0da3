use agendify_auth::server::{self, AuthState};
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub fn app(auth: AuthState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(health_check))
        .merge(server::router(auth))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> &'static str {
    "OK"
}

async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true }))
}
