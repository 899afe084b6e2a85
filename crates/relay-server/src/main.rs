//! Sealed Relay server - Entry point.

use relay_server::{
    api::{create_router, spawn_limiter_cleanup},
    build_state,
    config::LogFormat,
    delivery, Config,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load().and_then(|c| c.validate().map(|_| c)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    match config.log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        sender_policy = ?config.relay.sender_policy,
        otp_ttl = ?config.otp.ttl,
        "Starting Sealed Relay"
    );

    // Initialize code delivery
    let delivery = match delivery::from_config(&config.delivery) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create code delivery: {:#}", e);
            std::process::exit(1);
        }
    };

    if config.delivery.echo_code {
        warn!("Verification codes are echoed in /verify responses");
    }

    // Create application state and router
    let state = build_state(&config, delivery);
    spawn_limiter_cleanup(state.rate_limit.clone(), config.rate_limit.cleanup_interval);
    let app = create_router(state);

    // Bind to address
    let addr = match config.listen_addr() {
        Ok(a) => a,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Run server
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
