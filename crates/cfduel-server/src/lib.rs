pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod game_service;
pub mod gateway;
pub mod health;
pub mod hub;
pub mod judge;
pub mod outbox;
pub mod rate_limit;
pub mod room_service;
pub mod state;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ConnectInfo;
use axum::middleware;
use axum::routing::{get, post, put};
use chrono::Utc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use cfduel_core::events::ServerEvent;
use cfduel_core::room::RoomStatus;

use config::ServerConfig;
use judge::JudgeClient;
use state::AppState;
use store::Store;

/// Build the Axum router and application state from a config and the
/// two ports. Tests inject an in-memory store and a stub judge here.
pub fn build_app(
    config: ServerConfig,
    store: Arc<dyn Store>,
    judge: Arc<dyn JudgeClient>,
) -> (Router, AppState) {
    let state = AppState::new(config, store, judge);

    // REST surface (rate-limited, request-timeout-bounded)
    let api_routes = Router::new()
        .route("/auth/login", post(api::login))
        .route("/auth/me", get(api::me))
        .route("/auth/logout", post(api::logout))
        .route("/rooms/create", post(api::create_room))
        .route("/rooms/{code}/join", post(api::join_room))
        .route("/rooms/{code}/leave", post(api::leave_room))
        .route("/rooms/{code}/settings", put(api::update_settings))
        .route("/rooms/{code}", get(api::get_room))
        .route("/game/{code}/problems", get(api::get_problems))
        .route("/game/{code}/leaderboard", get(api::get_leaderboard))
        .route("/game/{code}/state", get(api::get_game_state))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_rate_limit_layer,
        ))
        .layer(
            ServiceBuilder::new().layer(TimeoutLayer::with_status_code(
                axum::http::StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(state.config.limits.request_timeout_secs),
            )),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(health::health_check))
        .merge(api_routes)
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

/// Background task that publishes a `timer-sync` with the server's wall
/// clock to every room with a running game. Independent of the per-room
/// end timers, so a slow finalization never delays clock sync.
pub fn spawn_timer_sync(state: AppState) {
    let period = Duration::from_secs(state.config.game.timer_sync_interval_secs);
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Timer sync shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let event = ServerEvent::TimerSync {
                        server_time: Utc::now().timestamp_millis(),
                    };
                    for code in state.hub.active_games() {
                        state.hub.publish(&code, &event);
                    }
                }
            }
        }
    });
}

/// Background task that periodically drops stale rate-limiter buckets.
pub fn spawn_rate_limit_prune(state: AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    state.api_limiter.prune(Duration::from_secs(300));
                }
            }
        }
    });
}

/// Re-arm end timers for games that were running when the process last
/// stopped. A room whose deadline already passed finalizes immediately,
/// so late clients still receive their `game-ended`.
pub async fn restore_active_games(state: &AppState) {
    let rooms = match state.store.rooms_with_status(RoomStatus::Started).await {
        Ok(rooms) => rooms,
        Err(e) => {
            tracing::error!(error = %e, "Failed to scan for running games at boot");
            return;
        },
    };
    for room in rooms {
        let Some(started_at) = room.started_at else {
            tracing::warn!(room = %room.code, "Started room has no start instant, skipping");
            continue;
        };
        tracing::info!(room = %room.code, "Restoring game end timer");
        state
            .games
            .arm_end_timer(room.code.clone(), started_at, room.duration());
    }
}

/// Middleware that enforces per-IP rate limiting on REST endpoints.
async fn api_rate_limit_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    if !state.api_limiter.allow(ip) {
        tracing::warn!(%ip, "API rate limit exceeded");
        return Err(axum::http::StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}
