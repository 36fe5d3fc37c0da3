use serde::{Deserialize, Serialize};

// GET /api/auth/twitter/callback2
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// GET /api/auth/twitter/status
#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub authorized: bool,
    pub refreshable: bool,
}

// POST /api/auth/twitter/refresh
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
}
