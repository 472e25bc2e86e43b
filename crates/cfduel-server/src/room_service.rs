use std::sync::Arc;

use cfduel_core::events::{ParticipantInfo, ServerEvent};
use cfduel_core::room::{self, Room, RoomSettings, RoomStatus};
use cfduel_core::user::UserId;

use crate::error::AppError;
use crate::hub::Hub;
use crate::store::{Removal, Store, StoreError};

/// Request-side room lifecycle: create, join, leave, settings, and the
/// host-transfer rule for waiting rooms.
pub struct RoomService {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
}

impl RoomService {
    pub fn new(store: Arc<dyn Store>, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    /// Create a room with a fresh code, rejection-sampling until the
    /// store accepts one.
    pub async fn create_room(
        &self,
        host: UserId,
        min_rating: i32,
        max_rating: i32,
    ) -> Result<Room, AppError> {
        let settings = RoomSettings::normalized(min_rating, max_rating);
        loop {
            let code = {
                let mut rng = rand::rng();
                room::generate_room_code(&mut rng)
            };
            if self.store.find_room(&code).await?.is_some() {
                continue;
            }
            match self.store.create_room(&code, host, settings).await {
                Ok(created) => {
                    tracing::info!(room = %created.code, host = %host, "Room created");
                    return Ok(created);
                },
                // Lost the race for this code, draw again
                Err(StoreError::CodeTaken(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Add the user to the room (idempotent) and broadcast the updated
    /// participant list.
    pub async fn join_room(&self, code: &str, user: UserId) -> Result<Room, AppError> {
        let updated = self.store.add_participant(code, user).await?;
        self.broadcast_room_update(&updated).await?;
        Ok(updated)
    }

    /// Remove the user. An emptied room is cascade-deleted; otherwise a
    /// departing host of a waiting room hands the seat to the first
    /// remaining participant.
    pub async fn leave_room(&self, code: &str, user: UserId) -> Result<(), AppError> {
        let before = self
            .store
            .find_room(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {code} not found")))?;
        let leaver = self.store.find_user(user).await?;
        let was_host = before.host == user;

        match self.store.remove_participant(code, user).await? {
            Removal::RoomDeleted => {
                self.hub.cancel_game_runtime(code);
                self.hub.cancel_grace_for_room(code);
                self.hub.drop_topic(code);
                tracing::info!(room = code, "Room destroyed, last participant left");
            },
            Removal::Remaining(mut updated) => {
                if was_host && updated.status == RoomStatus::Waiting {
                    let new_host_id = updated.participants[0];
                    updated = self.store.set_host(code, new_host_id).await?;
                    if let Some(new_host) = self.store.find_user(new_host_id).await? {
                        self.hub.publish(
                            code,
                            &ServerEvent::HostChanged {
                                room_code: code.to_string(),
                                new_host: ParticipantInfo::from(&new_host),
                                previous_host: leaver
                                    .as_ref()
                                    .map(|u| u.handle.clone())
                                    .unwrap_or_default(),
                            },
                        );
                        tracing::info!(room = code, new_host = %new_host.handle, "Host transferred");
                    }
                }
                self.broadcast_room_update(&updated).await?;
                if let Some(leaver) = &leaver {
                    self.hub.publish(
                        code,
                        &ServerEvent::PlayerLeft {
                            user_id: user,
                            handle: leaver.handle.clone(),
                        },
                    );
                }
            },
        }

        // An explicit leave supersedes any pending removal
        self.hub.cancel_grace(code, user);
        Ok(())
    }

    /// Host-only, waiting-only. The rating band is honored; the
    /// server-fixed fields are coerced by the store.
    pub async fn update_settings(
        &self,
        code: &str,
        by: UserId,
        min_rating: i32,
        max_rating: i32,
    ) -> Result<Room, AppError> {
        let room = self
            .store
            .find_room(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {code} not found")))?;
        if room.host != by {
            return Err(AppError::Forbidden(
                "Only the host can update room settings".to_string(),
            ));
        }
        Ok(self.store.update_settings(code, min_rating, max_rating).await?)
    }

    pub async fn participant_infos(&self, room: &Room) -> Result<Vec<ParticipantInfo>, AppError> {
        let users = self.store.find_users(&room.participants).await?;
        Ok(users.iter().map(ParticipantInfo::from).collect())
    }

    pub async fn broadcast_room_update(&self, room: &Room) -> Result<(), AppError> {
        let participants = self.participant_infos(room).await?;
        self.hub.publish(
            &room.code,
            &ServerEvent::RoomUpdate {
                room_code: room.code.clone(),
                participants,
            },
        );
        Ok(())
    }
}
