// Types shared with the job runner
pub mod common;

mod error;
mod token_store;

pub use common::TokenPair;
pub use error::AuthError;
pub use token_store::TokenStore;

// Authorization flow and its HTTP surface
#[cfg(feature = "server")]
pub mod server;
