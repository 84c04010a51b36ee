use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zlremote_server::{create_app, state::Config, tasks};

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file is optional
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "zlremote_server=debug,zlremote_media=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ZLRemote signaling server...");

    // Load configuration
    let config = Config::load()?;

    // Build the router and shared state
    let (app, state) = create_app(config.clone());

    // Background tasks
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(tasks::start_liveness_sweeper(
        state.router.clone(),
        config.sweep_interval,
        config.liveness_timeout,
        shutdown.clone(),
    ));

    // Start the server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Listening on {}", config.bind_address);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper.await?;

    tracing::info!("Server stopped");
    Ok(())
}
