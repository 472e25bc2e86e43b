use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cfduel_core::events::ParticipantInfo;
use cfduel_core::leaderboard::{LeaderboardEntry, ProblemScore};
use cfduel_core::problem::RoomProblem;
use cfduel_core::room::{Room, RoomSettings, RoomStatus};
use cfduel_core::user::{User, UserId};

use crate::auth::bearer_token;
use crate::error::AppError;
use crate::state::AppState;

/// Resolve the caller from the bearer token, or fail NotAuthenticated.
async fn authed_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = bearer_token(headers).ok_or(AppError::NotAuthenticated)?;
    let user_id = state.auth.verify(token).ok_or(AppError::NotAuthenticated)?;
    state
        .store
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotAuthenticated)
}

/// API-facing room representation with participants resolved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub code: String,
    pub host: UserId,
    pub participants: Vec<ParticipantInfo>,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub started_at: Option<DateTime<Utc>>,
}

async fn room_view(state: &AppState, room: &Room) -> Result<RoomView, AppError> {
    Ok(RoomView {
        code: room.code.clone(),
        host: room.host,
        participants: state.rooms.participant_infos(room).await?,
        settings: room.settings,
        status: room.status,
        started_at: room.started_at,
    })
}

async fn room_or_404(state: &AppState, code: &str) -> Result<Room, AppError> {
    state
        .store
        .find_room(code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Room {code} not found")))
}

// ---- auth ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub handle: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

/// POST /auth/login — resolve the handle at the judge, upsert the user,
/// mint an identity token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, AppError> {
    let judge_user = state.judge.resolve_user(body.handle.trim()).await?;
    let user = state
        .store
        .upsert_user_by_handle(&judge_user.handle, judge_user.rating, &judge_user.avatar)
        .await?;
    let token = state.auth.mint(user.id);
    tracing::info!(user = %user.handle, "Login");
    Ok(Json(LoginResponse { user, token }))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
}

/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AppError> {
    let user = authed_user(&state, &headers).await?;
    Ok(Json(MeResponse { user }))
}

/// POST /auth/logout — tokens are stateless, the client discards its copy.
pub async fn logout() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

// ---- rooms ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettingsBody {
    pub min_rating: i32,
    pub max_rating: i32,
}

impl Default for RoomSettingsBody {
    fn default() -> Self {
        let defaults = RoomSettings::default();
        Self {
            min_rating: defaults.min_rating,
            max_rating: defaults.max_rating,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub code: String,
    pub settings: RoomSettings,
    pub participants: Vec<ParticipantInfo>,
}

/// POST /rooms/create
pub async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoomSettingsBody>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let user = authed_user(&state, &headers).await?;
    let room = state
        .rooms
        .create_room(user.id, body.min_rating, body.max_rating)
        .await?;
    let participants = state.rooms.participant_infos(&room).await?;
    Ok(Json(CreateRoomResponse {
        code: room.code,
        settings: room.settings,
        participants,
    }))
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub participants: Vec<ParticipantInfo>,
}

/// POST /rooms/{code}/join
pub async fn join_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ParticipantsResponse>, AppError> {
    let user = authed_user(&state, &headers).await?;
    let room = state.rooms.join_room(&code, user.id).await?;
    let participants = state.rooms.participant_infos(&room).await?;
    Ok(Json(ParticipantsResponse { participants }))
}

/// POST /rooms/{code}/leave
pub async fn leave_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = authed_user(&state, &headers).await?;
    state.rooms.leave_room(&code, user.id).await?;
    Ok(Json(serde_json::json!({})))
}

/// PUT /rooms/{code}/settings — host-only, waiting-only.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RoomSettingsBody>,
) -> Result<Json<RoomView>, AppError> {
    let user = authed_user(&state, &headers).await?;
    let room = state
        .rooms
        .update_settings(&code, user.id, body.min_rating, body.max_rating)
        .await?;
    Ok(Json(room_view(&state, &room).await?))
}

/// GET /rooms/{code}
pub async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>, AppError> {
    authed_user(&state, &headers).await?;
    let room = room_or_404(&state, &code).await?;
    Ok(Json(room_view(&state, &room).await?))
}

// ---- game ----------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProblemsResponse {
    pub problems: Vec<RoomProblem>,
}

/// GET /game/{code}/problems
pub async fn get_problems(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ProblemsResponse>, AppError> {
    authed_user(&state, &headers).await?;
    room_or_404(&state, &code).await?;
    let problems = state.store.list_room_problems(&code).await?;
    Ok(Json(ProblemsResponse { problems }))
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// GET /game/{code}/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LeaderboardResponse>, AppError> {
    authed_user(&state, &headers).await?;
    room_or_404(&state, &code).await?;
    let leaderboard = state.games.leaderboard(&code).await?;
    Ok(Json(LeaderboardResponse { leaderboard }))
}

/// Full game snapshot, including the caller's own solved set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateResponse {
    pub room: RoomView,
    pub problems: Vec<RoomProblem>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub solved: Vec<ProblemScore>,
    /// Server wall clock, epoch milliseconds.
    pub server_time: i64,
}

/// GET /game/{code}/state
pub async fn get_game_state(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<GameStateResponse>, AppError> {
    let user = authed_user(&state, &headers).await?;
    let room = room_or_404(&state, &code).await?;
    let problems = state.store.list_room_problems(&code).await?;
    let leaderboard = state.games.leaderboard(&code).await?;
    let solved = state
        .store
        .list_scores_of(&code, user.id)
        .await?
        .into_iter()
        .map(|s| ProblemScore {
            contest_id: s.contest_id,
            index: s.index,
            points: s.points,
            solved_at: s.solved_at,
        })
        .collect();
    Ok(Json(GameStateResponse {
        room: room_view(&state, &room).await?,
        problems,
        leaderboard,
        solved,
        server_time: Utc::now().timestamp_millis(),
    }))
}
