use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use cfduel_core::problem::RoomProblem;
use cfduel_core::room::{Room, RoomSettings, RoomStatus};
use cfduel_core::score::Score;
use cfduel_core::user::{User, UserId};

use super::{Removal, ScoreInsert, Store, StoreError};

/// In-memory store. All invariants (code uniqueness, score uniqueness,
/// the empty-room cascade) are enforced under a single write guard, so
/// every operation is serializable and the cascade is atomic.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    handle_index: HashMap<String, UserId>,
    rooms: HashMap<String, Room>,
    problems: HashMap<String, Vec<RoomProblem>>,
    scores: HashMap<String, Vec<Score>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn room_mut(&mut self, code: &str) -> Result<&mut Room, StoreError> {
        self.rooms
            .get_mut(code)
            .ok_or_else(|| StoreError::RoomNotFound(code.to_string()))
    }

    fn room(&self, code: &str) -> Result<&Room, StoreError> {
        self.rooms
            .get(code)
            .ok_or_else(|| StoreError::RoomNotFound(code.to_string()))
    }

    /// Drop the room and everything it owns.
    fn cascade_delete(&mut self, code: &str) {
        self.rooms.remove(code);
        self.problems.remove(code);
        self.scores.remove(code);
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert_user_by_handle(
        &self,
        handle: &str,
        rating: Option<i32>,
        avatar: &str,
    ) -> Result<User, StoreError> {
        let mut tables = self.inner.write().await;
        if let Some(&id) = tables.handle_index.get(handle) {
            let user = tables.users.get_mut(&id).expect("handle index out of sync");
            user.rating = rating;
            user.avatar = avatar.to_string();
            return Ok(user.clone());
        }
        let user = User::new(handle, rating, avatar);
        tables.handle_index.insert(handle.to_string(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let tables = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id).cloned())
            .collect())
    }

    async fn create_room(
        &self,
        code: &str,
        host: UserId,
        settings: RoomSettings,
    ) -> Result<Room, StoreError> {
        let mut tables = self.inner.write().await;
        if tables.rooms.contains_key(code) {
            return Err(StoreError::CodeTaken(code.to_string()));
        }
        let room = Room::new(code.to_string(), host, settings);
        tables.rooms.insert(code.to_string(), room.clone());
        Ok(room)
    }

    async fn find_room(&self, code: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.inner.read().await.rooms.get(code).cloned())
    }

    async fn find_room_by_participant_and_status(
        &self,
        user: UserId,
        status: RoomStatus,
    ) -> Result<Option<Room>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .rooms
            .values()
            .find(|r| r.status == status && r.is_participant(user))
            .cloned())
    }

    async fn rooms_with_status(&self, status: RoomStatus) -> Result<Vec<Room>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .rooms
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn add_participant(&self, code: &str, user: UserId) -> Result<Room, StoreError> {
        let mut tables = self.inner.write().await;
        let room = tables.room_mut(code)?;
        if !room.is_participant(user) {
            room.participants.push(user);
        }
        Ok(room.clone())
    }

    async fn remove_participant(&self, code: &str, user: UserId) -> Result<Removal, StoreError> {
        let mut tables = self.inner.write().await;
        let room = tables.room_mut(code)?;
        room.participants.retain(|&p| p != user);
        if room.participants.is_empty() {
            tables.cascade_delete(code);
            return Ok(Removal::RoomDeleted);
        }
        Ok(Removal::Remaining(room.clone()))
    }

    async fn set_host(&self, code: &str, user: UserId) -> Result<Room, StoreError> {
        let mut tables = self.inner.write().await;
        let room = tables.room_mut(code)?;
        room.host = user;
        Ok(room.clone())
    }

    async fn set_status(
        &self,
        code: &str,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Room, StoreError> {
        let mut tables = self.inner.write().await;
        let room = tables.room_mut(code)?;
        if !room.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: room.status,
                to: status,
            });
        }
        room.status = status;
        if status == RoomStatus::Started {
            room.started_at = started_at;
        }
        Ok(room.clone())
    }

    async fn update_settings(
        &self,
        code: &str,
        min_rating: i32,
        max_rating: i32,
    ) -> Result<Room, StoreError> {
        let mut tables = self.inner.write().await;
        let room = tables.room_mut(code)?;
        if room.status != RoomStatus::Waiting {
            return Err(StoreError::NotWaiting(code.to_string()));
        }
        room.settings = RoomSettings::normalized(min_rating, max_rating);
        Ok(room.clone())
    }

    async fn put_room_problems(
        &self,
        code: &str,
        problems: Vec<RoomProblem>,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        tables.room(code)?;
        tables.problems.insert(code.to_string(), problems);
        Ok(())
    }

    async fn begin_game(
        &self,
        code: &str,
        problems: Vec<RoomProblem>,
        started_at: DateTime<Utc>,
    ) -> Result<Room, StoreError> {
        let mut tables = self.inner.write().await;
        let room = tables.room_mut(code)?;
        if !room.status.can_transition_to(RoomStatus::Started) {
            return Err(StoreError::InvalidTransition {
                from: room.status,
                to: RoomStatus::Started,
            });
        }
        room.status = RoomStatus::Started;
        room.started_at = Some(started_at);
        let room = room.clone();
        tables.problems.insert(code.to_string(), problems);
        Ok(room)
    }

    async fn insert_score(&self, score: Score) -> Result<ScoreInsert, StoreError> {
        let mut tables = self.inner.write().await;
        tables.room(&score.room_code)?;
        let scores = tables.scores.entry(score.room_code.clone()).or_default();
        if let Some(existing) = scores.iter().find(|s| {
            s.user_id == score.user_id
                && s.contest_id == score.contest_id
                && s.index == score.index
        }) {
            return Ok(ScoreInsert::AlreadyScored(existing.clone()));
        }
        scores.push(score.clone());
        Ok(ScoreInsert::Inserted(score))
    }

    async fn list_room_problems(&self, code: &str) -> Result<Vec<RoomProblem>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables.problems.get(code).cloned().unwrap_or_default())
    }

    async fn list_scores(&self, code: &str) -> Result<Vec<Score>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables.scores.get(code).cloned().unwrap_or_default())
    }

    async fn list_scores_of(&self, code: &str, user: UserId) -> Result<Vec<Score>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .scores
            .get(code)
            .map(|scores| {
                scores
                    .iter()
                    .filter(|s| s.user_id == user)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
