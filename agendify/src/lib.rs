pub mod config;
pub mod engagement;
pub mod jobs;
pub mod logging;
pub mod queue;
pub mod routes;
