mod requests;
mod session;

pub use requests::{AuthStatusResponse, CallbackParams, RefreshResponse};
pub use session::{AuthorizationSession, PendingAuthorization};
