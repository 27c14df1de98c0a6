use std::sync::Arc;

use display_fabric_server::binding::{DisplayScreenStore, PgDisplayScreenStore};
use display_fabric_server::builder::{ScheduleSnapshotBuilder, WsAwareBuilder};
use display_fabric_server::config::Config;
use display_fabric_server::provider::PostgresScheduleDataProvider;
use display_fabric_server::state::AppState;
use display_fabric_server::{build_router, db};
use kv_store::{InMemoryKvStore, KvStore, RedisKvStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let kv: Arc<dyn KvStore> = match &config.kv_url {
        Some(url) => Arc::new(
            RedisKvStore::connect(url)
                .await
                .expect("failed to connect to key-value store"),
        ),
        None => {
            tracing::warn!("KV_URL not set; using an in-process key-value store (single instance only)");
            Arc::new(InMemoryKvStore::new())
        }
    };

    let screens: Arc<dyn DisplayScreenStore> = Arc::new(PgDisplayScreenStore::new(pool.clone()));

    let builder = Arc::new(WsAwareBuilder {
        inner: ScheduleSnapshotBuilder::new(PostgresScheduleDataProvider::new(pool.clone())),
        ws_enabled: config.ws_enabled,
        clock: chrono::Utc::now,
    });

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, kv, screens, builder, config);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
