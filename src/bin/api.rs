use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_chat_service::config::Settings;
use relay_chat_service::infrastructure::postgres;
use relay_chat_service::infrastructure::redis::RedisClient;
use relay_chat_service::server::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::new()?;
    tracing::info!(env = %settings.server.env, "configuration loaded");

    let pool = postgres::connect(&settings.db).await?;

    let redis = Arc::new(RedisClient::new(&settings.redis)?);
    redis.ping().await?;
    tracing::info!("redis connection verified");

    let addr = settings.server_addr();
    let state = AppState::new(settings, pool, redis);
    let app = create_app(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "starting server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down server");
        }
        _ = terminate => {
            tracing::info!("received terminate signal, shutting down server");
        }
    }
}
