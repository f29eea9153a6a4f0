use std::sync::Arc;

use clap::Parser;
use resvctl::{Config, ExpirationProcessor, LogNotifier, telemetry};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = resvctl::config::Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    resvctl::migrator().run(&pool).await?;

    let policies = config.policy_cache.build();

    // The processor's lifecycle is owned here, not by a module-level timer:
    // shutdown stops the periodic loop before the pool goes away.
    let processor = if config.processor.enabled {
        Some(ExpirationProcessor::start(
            pool.clone(),
            policies.clone(),
            Arc::new(LogNotifier),
            config.processor.clone(),
        ))
    } else {
        tracing::warn!("Expiration processor is disabled; reservations will not expire");
        None
    };

    shutdown_signal().await;

    if let Some(processor) = processor {
        processor.shutdown().await;
    }
    pool.close().await;

    Ok(())
}
