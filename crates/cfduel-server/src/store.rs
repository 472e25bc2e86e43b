use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use cfduel_core::problem::RoomProblem;
use cfduel_core::room::{Room, RoomSettings, RoomStatus};
use cfduel_core::score::Score;
use cfduel_core::user::{User, UserId};

pub mod memory;

pub use memory::MemStore;

/// Typed failures from the persistence port.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("room code {0} already taken")]
    CodeTaken(String),
    #[error("room {0} is not in the waiting state")]
    NotWaiting(String),
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: RoomStatus, to: RoomStatus },
}

/// Result of a score insert against the uniqueness index.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreInsert {
    Inserted(Score),
    /// A score for the same (room, user, contest, index) already exists;
    /// the stored one is returned untouched.
    AlreadyScored(Score),
}

/// Result of removing a participant.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    Remaining(Room),
    /// The participant set became empty; the room and all of its
    /// problems and scores were deleted in the same transaction.
    RoomDeleted,
}

/// Persistence port. Each operation is individually serializable; the
/// empty-room cascade inside `remove_participant` is a single
/// transactional unit. Scores rely on the store's uniqueness index on
/// (room, user, contest, index) as the only source of truth for
/// "already solved".
#[async_trait]
pub trait Store: Send + Sync {
    /// Case-preserving, idempotent upsert keyed by the exact handle.
    async fn upsert_user_by_handle(
        &self,
        handle: &str,
        rating: Option<i32>,
        avatar: &str,
    ) -> Result<User, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Resolve many users, preserving the order of `ids` and skipping
    /// unknown ones.
    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    /// Rejects with [`StoreError::CodeTaken`] on a code collision.
    async fn create_room(
        &self,
        code: &str,
        host: UserId,
        settings: RoomSettings,
    ) -> Result<Room, StoreError>;

    async fn find_room(&self, code: &str) -> Result<Option<Room>, StoreError>;

    async fn find_room_by_participant_and_status(
        &self,
        user: UserId,
        status: RoomStatus,
    ) -> Result<Option<Room>, StoreError>;

    async fn rooms_with_status(&self, status: RoomStatus) -> Result<Vec<Room>, StoreError>;

    /// Idempotent; returns the updated room.
    async fn add_participant(&self, code: &str, user: UserId) -> Result<Room, StoreError>;

    async fn remove_participant(&self, code: &str, user: UserId) -> Result<Removal, StoreError>;

    async fn set_host(&self, code: &str, user: UserId) -> Result<Room, StoreError>;

    async fn set_status(
        &self,
        code: &str,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Room, StoreError>;

    /// Rejects unless the room is still waiting. The server-fixed
    /// settings fields are coerced, not honored.
    async fn update_settings(
        &self,
        code: &str,
        min_rating: i32,
        max_rating: i32,
    ) -> Result<Room, StoreError>;

    /// Atomic replace of the room's problem set.
    async fn put_room_problems(
        &self,
        code: &str,
        problems: Vec<RoomProblem>,
    ) -> Result<(), StoreError>;

    /// The waiting→started commit as one transactional unit: replaces
    /// the problem set, flips the status, and stamps the start instant.
    async fn begin_game(
        &self,
        code: &str,
        problems: Vec<RoomProblem>,
        started_at: DateTime<Utc>,
    ) -> Result<Room, StoreError>;

    async fn insert_score(&self, score: Score) -> Result<ScoreInsert, StoreError>;

    async fn list_room_problems(&self, code: &str) -> Result<Vec<RoomProblem>, StoreError>;

    async fn list_scores(&self, code: &str) -> Result<Vec<Score>, StoreError>;

    async fn list_scores_of(&self, code: &str, user: UserId) -> Result<Vec<Score>, StoreError>;
}
