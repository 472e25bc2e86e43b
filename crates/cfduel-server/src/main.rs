use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use cfduel_server::config::ServerConfig;
use cfduel_server::judge::HttpJudgeClient;
use cfduel_server::store::MemStore;
use cfduel_server::{build_app, restore_active_games, spawn_rate_limit_prune, spawn_timer_sync};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let store = Arc::new(MemStore::new());
    let judge = Arc::new(HttpJudgeClient::new(&config.judge));
    let (app, state) = build_app(config, store, judge);

    // Games that were running before a restart get their timers back
    // before any traffic is accepted.
    restore_active_games(&state).await;

    spawn_timer_sync(state.clone());
    spawn_rate_limit_prune(state.clone());

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {listen_addr}: {e}"));

    tracing::info!("cfduel server listening on {listen_addr}");

    let shutdown_state = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        shutdown_state.shutdown.cancel();
        shutdown_state.hub.shutdown();
    })
    .await
    .expect("Server error");
}
