pub mod oauth_client;
pub mod session_store;

pub use oauth_client::OAuthClient;
pub use session_store::SessionStore;
