use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_chat_service::config::Settings;
use relay_chat_service::infrastructure::postgres;
use relay_chat_service::infrastructure::redis::RedisClient;
use relay_chat_service::queue::{MessageQueue, QueueConfig};
use relay_chat_service::store::MessageStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::new()?;
    tracing::info!(env = %settings.server.env, "configuration loaded");

    let pool = postgres::connect(&settings.db).await?;

    let redis = Arc::new(RedisClient::new(&settings.redis)?);
    redis.ping().await?;
    tracing::info!("redis connection verified");

    let messages = MessageStore::new(pool);
    let queue = Arc::new(MessageQueue::new(
        redis,
        QueueConfig::from(&settings.stream),
        messages,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    // Signal handler: one shutdown broadcast stops both loops.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutting down worker");
            let _ = shutdown_tx.send(());
        });
    }

    tracing::info!("starting DLQ processor");
    let dlq_queue = queue.clone();
    let dlq_shutdown = shutdown_tx.subscribe();
    let dlq_handle = tokio::spawn(async move {
        if let Err(e) = dlq_queue.process_dlq(dlq_shutdown).await {
            tracing::error!(error = %e, "DLQ processor failed");
            std::process::exit(1);
        }
    });

    tracing::info!("starting message processor");
    if let Err(e) = queue.process_messages(shutdown_tx.subscribe()).await {
        tracing::error!(error = %e, "queue consumer failed");
        std::process::exit(1);
    }

    let _ = dlq_handle.await;
    tracing::info!("worker stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
