use serde::{Deserialize, Serialize};

use crate::leaderboard::LeaderboardEntry;
use crate::problem::RoomProblem;
use crate::user::{User, UserId};

/// Wire form of a participant inside `room-update` and `host-changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: UserId,
    pub handle: String,
    pub avatar: String,
    pub rating: Option<i32>,
}

impl From<&User> for ParticipantInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            handle: user.handle.clone(),
            avatar: user.avatar.clone(),
            rating: user.rating,
        }
    }
}

/// Inbound events (client → server). Frames are JSON text messages of
/// the form `{ "event": <name>, "data": <payload> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: String },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_code: String },
    #[serde(rename_all = "camelCase")]
    StartGame { room_code: String },
    #[serde(rename_all = "camelCase")]
    CheckProblem {
        room_code: String,
        contest_id: u32,
        index: String,
    },
}

/// Outbound events (server → client), same frame shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ConnectionSuccess,
    #[serde(rename_all = "camelCase")]
    RoomUpdate {
        room_code: String,
        participants: Vec<ParticipantInfo>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { user_id: UserId, handle: String },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        user_id: UserId,
        handle: String,
        /// Seconds until the grace ticket expires.
        grace_period: u64,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReconnected { user_id: UserId, handle: String },
    #[serde(rename_all = "camelCase")]
    HostChanged {
        room_code: String,
        new_host: ParticipantInfo,
        previous_host: String,
    },
    #[serde(rename_all = "camelCase")]
    GameStarting { room_code: String },
    #[serde(rename_all = "camelCase")]
    GameStarted {
        room_code: String,
        problems: Vec<RoomProblem>,
        /// RFC 3339 start instant.
        start_time: String,
        /// Minutes.
        duration: i64,
    },
    #[serde(rename_all = "camelCase")]
    TimerSync {
        /// Server wall clock, epoch milliseconds.
        server_time: i64,
    },
    #[serde(rename_all = "camelCase")]
    ProblemSolved {
        user_id: UserId,
        handle: String,
        contest_id: u32,
        index: String,
        points: u32,
    },
    #[serde(rename_all = "camelCase")]
    ProblemNotSolved {
        contest_id: u32,
        index: String,
        message: String,
    },
    LeaderboardUpdate(Vec<LeaderboardEntry>),
    #[serde(rename_all = "camelCase")]
    GameEnded {
        room_code: String,
        leaderboard: Vec<LeaderboardEntry>,
        winner: Option<LeaderboardEntry>,
    },
    Error { message: String },
}

impl ServerEvent {
    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess => "connection-success",
            Self::RoomUpdate { .. } => "room-update",
            Self::PlayerLeft { .. } => "player-left",
            Self::PlayerDisconnected { .. } => "player-disconnected",
            Self::PlayerReconnected { .. } => "player-reconnected",
            Self::HostChanged { .. } => "host-changed",
            Self::GameStarting { .. } => "game-starting",
            Self::GameStarted { .. } => "game-started",
            Self::TimerSync { .. } => "timer-sync",
            Self::ProblemSolved { .. } => "problem-solved",
            Self::ProblemNotSolved { .. } => "problem-not-solved",
            Self::LeaderboardUpdate(_) => "leaderboard-update",
            Self::GameEnded { .. } => "game-ended",
            Self::Error { .. } => "error",
        }
    }

    /// Whether an overflowing outbox may discard this event. Events that
    /// carry unique facts are never droppable; state snapshots are,
    /// because a newer one supersedes them.
    pub fn droppable(&self) -> bool {
        !matches!(self, Self::ProblemSolved { .. } | Self::GameStarted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_decodes() {
        let frame = r#"{"event":"check-problem","data":{"roomCode":"K3X9Q0","contestId":100,"index":"A"}}"#;
        let parsed: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::CheckProblem {
                room_code: "K3X9Q0".into(),
                contest_id: 100,
                index: "A".into(),
            }
        );
    }

    #[test]
    fn join_frame_decodes() {
        let frame = r#"{"event":"join-room","data":{"roomCode":"K3X9Q0"}}"#;
        let parsed: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::JoinRoom {
                room_code: "K3X9Q0".into()
            }
        );
    }

    #[test]
    fn server_frame_shape() {
        let event = ServerEvent::ProblemSolved {
            user_id: uuid::Uuid::new_v4(),
            handle: "alice".into(),
            contest_id: 100,
            index: "A".into(),
            points: 485,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "problem-solved");
        assert_eq!(json["data"]["contestId"], 100);
        assert_eq!(json["data"]["points"], 485);
    }

    #[test]
    fn unit_variant_omits_data() {
        let json = serde_json::to_value(ServerEvent::ConnectionSuccess).unwrap();
        assert_eq!(json["event"], "connection-success");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn leaderboard_update_payload_is_array() {
        let json = serde_json::to_value(ServerEvent::LeaderboardUpdate(vec![])).unwrap();
        assert_eq!(json["event"], "leaderboard-update");
        assert!(json["data"].is_array());
    }

    #[test]
    fn droppability_protects_unique_facts() {
        let solved = ServerEvent::ProblemSolved {
            user_id: uuid::Uuid::new_v4(),
            handle: "a".into(),
            contest_id: 1,
            index: "A".into(),
            points: 500,
        };
        assert!(!solved.droppable());
        assert!(
            ServerEvent::TimerSync { server_time: 0 }.droppable()
        );
        assert!(ServerEvent::LeaderboardUpdate(vec![]).droppable());
    }

    #[test]
    fn names_match_wire_tags() {
        let event = ServerEvent::GameStarting {
            room_code: "K3X9Q0".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
    }
}
