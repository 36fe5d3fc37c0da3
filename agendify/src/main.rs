use agendify::{
    config::Configuration,
    engagement::{CommandProcedure, EngagementTrigger},
    jobs::{self, XPublisher},
    logging::init_logging,
    queue::{JobQueue, JobStore},
    routes,
};
use agendify_auth::{
    server::{
        cookie_key,
        services::{OAuthClient, SessionStore},
        AuthState, AuthorizationFlow,
    },
    TokenStore,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let configuration = Configuration::new()?;
    let _log_guard = init_logging(&configuration.logging)?;
    configuration.validate()?;
    tracing::info!("Configuration loaded successfully");

    // Authorization
    let tokens = Arc::new(match &configuration.oauth.token_file {
        Some(path) => TokenStore::persistent(path)?,
        None => TokenStore::in_memory(),
    });
    let sessions = Arc::new(SessionStore::new(configuration.server.session_ttl_seconds));
    let oauth_client = Arc::new(OAuthClient::new(&configuration.oauth)?);
    let auth_state = AuthState {
        flow: Arc::new(AuthorizationFlow::new(
            sessions,
            oauth_client,
            tokens.clone(),
        )),
        cookie_key: cookie_key(configuration.server.session_secret.as_deref()),
    };

    // Job queue
    let store = JobStore::connect(&configuration.database.url).await?;
    let queue = JobQueue::new(store.clone(), configuration.queue_settings()?);
    jobs::register(
        &queue,
        tokens,
        Arc::new(XPublisher::new(configuration.api.base_url.clone())),
        configuration.queue.retention_days,
    )
    .await?;
    queue.start().await?;

    // Engagement updates
    let mut trigger = if configuration.engagement.enabled {
        let engagement = &configuration.engagement;
        let mut procedure = CommandProcedure::new(
            engagement.program.clone(),
            engagement.args.clone(),
            Duration::from_secs(engagement.timeout_seconds),
        );
        if let Some(dir) = &engagement.working_dir {
            procedure = procedure.working_dir(dir);
        }

        let mut trigger =
            EngagementTrigger::new(configuration.engagement_schedule()?, Arc::new(procedure));
        trigger.start()?;
        Some(trigger)
    } else {
        tracing::info!("Engagement updates disabled");
        None
    };

    // Start server
    let addr = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, routes::app(auth_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(trigger) = trigger.as_mut() {
        trigger.stop().await?;
    }
    queue.stop().await?;
    store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
