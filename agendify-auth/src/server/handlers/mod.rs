mod callback;
mod refresh;
mod start;
mod status;

pub use callback::oauth_callback;
pub use refresh::refresh_token;
pub use start::start_authorization;
pub use status::authorization_status;
