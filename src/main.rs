//! taskboard server binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use taskboard::bridge::ChangeBridge;
use taskboard::config::Config;
use taskboard::realtime::Hub;
use taskboard::server::{router, AppState};
use taskboard::service::{TaskService, UserService};
use taskboard::store::{DocumentStore, MongoStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("taskboard=info,tower_http=warn")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        addr = %config.bind_addr,
        database = %config.store.database,
        realtime = config.realtime,
        "starting taskboard"
    );

    let store = MongoStore::connect(&config.store)
        .await
        .context("building store client")?;
    match store.ping().await {
        Ok(()) => tracing::info!("connected to store"),
        Err(err) if config.realtime => {
            // Realtime needs the change stream from the start; refuse to run
            // without a reachable store.
            return Err(err).context("store unreachable at startup");
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                "store unreachable; serving degraded until it recovers"
            );
        }
    }
    let store: Arc<dyn DocumentStore> = Arc::new(store);

    let hub = Arc::new(Hub::new());
    let state = AppState {
        users: Arc::new(UserService::new(store.clone())),
        tasks: Arc::new(TaskService::new(store.clone())),
        hub: hub.clone(),
    };

    let shutdown = CancellationToken::new();
    let bridge = config
        .realtime
        .then(|| ChangeBridge::new(store.clone(), hub.clone()).spawn(shutdown.clone()));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state, config.realtime))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    shutdown.cancel();
    if let Some(handle) = bridge {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            tracing::warn!("bridge did not stop within the shutdown grace period");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
