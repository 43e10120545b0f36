//! herald-notifier: sends one notification per product-created event.
//!
//! Startup order: environment, logging, database (with migrations), dispatch
//! and dead-letter collaborators, then the consumer loop until Ctrl+C or
//! SIGTERM.

mod config;
mod logging;

use std::sync::Arc;

use herald_events::{
    DeliveryPipeline, HttpDispatcher, KafkaDeadLetterPublisher, NotificationConsumer,
    PgIdempotencyStore, ProductCreated, TracingObserver,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    logging::init_logging(&config.log_filter);

    if let Err(e) = run(config).await {
        error!(error = %e, "herald-notifier stopped with an error");
        eprintln!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        topic = %config.pipeline.topic,
        dead_letter_topic = %config.pipeline.dead_letter_topic(),
        consumer_group = %config.kafka.consumer_group,
        concurrency = config.kafka.concurrency,
        retry_max_attempts = config.pipeline.retry_max_attempts,
        retry_backoff_ms = u64::try_from(config.pipeline.retry_backoff.as_millis()).unwrap_or(u64::MAX),
        "Starting herald-notifier"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    herald_db::run_migrations(&pool).await?;
    info!("Database ready");

    let dispatcher = HttpDispatcher::new(
        config.notification_endpoint_url.clone(),
        config.pipeline.dispatch_timeout,
    )?;

    let publisher = KafkaDeadLetterPublisher::new(&config.kafka, config.pipeline.dead_letter_topic())?;
    match publisher.health_check().await {
        Ok(status) if status.is_ready() => {
            info!(brokers = status.brokers, "Kafka reachable");
        }
        Ok(status) => {
            warn!(
                brokers = status.brokers,
                dead_letter_topic = %status.dead_letter_topic,
                "Dead-letter topic not found, relying on broker auto-creation"
            );
        }
        Err(e) => warn!(error = %e, "Kafka health check failed, continuing"),
    }

    let pipeline: DeliveryPipeline<ProductCreated, _, _, _> = DeliveryPipeline::from_config(
        Arc::new(PgIdempotencyStore::new(pool.clone())),
        Arc::new(dispatcher),
        Arc::new(publisher),
        Arc::new(TracingObserver),
        &config.pipeline,
    );

    let consumer = NotificationConsumer::new(&config.kafka, &config.pipeline.topic, Arc::new(pipeline))?;
    consumer.run(shutdown_signal()).await?;

    pool.close().await;
    info!("herald-notifier shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
