use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twinroom::{
    app,
    config::Config,
    db,
    rooms::cleanup::{run_cleanup_task, CleanupConfig},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twinroom=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url,
        bind_address = %config.bind_address,
        inactive_room_days = config.inactive_room_days,
        cleanup_interval_seconds = config.cleanup_interval_seconds,
        "configuration loaded"
    );

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    db::init(&db_pool).await.context("creating schema")?;

    let app_state = AppState::new(db_pool);
    app_state.coordinator.reconcile_on_start().await?;

    let cancel_token = CancellationToken::new();
    let cleanup = (config.cleanup_interval_seconds > 0).then(|| {
        tokio::spawn(run_cleanup_task(
            app_state.coordinator.clone(),
            CleanupConfig {
                interval: Duration::from_secs(config.cleanup_interval_seconds),
                inactive_room_days: config.inactive_room_days,
            },
            cancel_token.clone(),
        ))
    });

    let app = app(app_state, config.static_dir.as_deref());
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!(address = %config.bind_address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel_token.cancel();
    if let Some(cleanup) = cleanup {
        let _ = cleanup.await;
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
