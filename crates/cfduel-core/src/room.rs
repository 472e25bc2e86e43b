use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::user::UserId;

pub const ROOM_CODE_LEN: usize = 6;
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Server-fixed game shape. Clients may send other values in settings
/// updates; they are coerced back to these.
pub const QUESTION_COUNT: usize = 2;
pub const DURATION_MINS: i64 = 15;

/// Lifecycle state of a room. Transitions are monotone:
/// waiting → started → ended, and nothing leaves `ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Started,
    Ended,
}

impl RoomStatus {
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Waiting, RoomStatus::Started) | (RoomStatus::Started, RoomStatus::Ended)
        )
    }
}

/// Per-room game settings. Only the rating band is host-controlled;
/// `question_count` and `duration_mins` are server defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub min_rating: i32,
    pub max_rating: i32,
    pub question_count: usize,
    pub duration_mins: i64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            min_rating: 800,
            max_rating: 1400,
            question_count: QUESTION_COUNT,
            duration_mins: DURATION_MINS,
        }
    }
}

impl RoomSettings {
    /// Build settings from a client-supplied rating band, coercing the
    /// server-fixed fields regardless of what the client sent.
    pub fn normalized(min_rating: i32, max_rating: i32) -> Self {
        Self {
            min_rating,
            max_rating,
            question_count: QUESTION_COUNT,
            duration_mins: DURATION_MINS,
        }
    }
}

/// A short-lived duel room. Participants are kept in insertion order;
/// the first remaining participant inherits the host seat when the host
/// leaves a waiting room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: String,
    pub host: UserId,
    pub participants: Vec<UserId>,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub started_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn new(code: String, host: UserId, settings: RoomSettings) -> Self {
        Self {
            code,
            host,
            participants: vec![host],
            settings,
            status: RoomStatus::Waiting,
            started_at: None,
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.settings.duration_mins)
    }

    /// Instant at which the game ends, once started.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at.map(|t| t + self.duration())
    }
}

/// Draw a candidate room code. Uniqueness is the store's job; callers
/// rejection-sample until the code is free.
pub fn generate_room_code<R: Rng>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn room_code_format() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let code = generate_room_code(&mut rng);
            assert!(is_valid_room_code(&code), "Invalid room code: {code}");
        }
    }

    #[test]
    fn rejects_bad_codes() {
        assert!(!is_valid_room_code("abc123"));
        assert!(!is_valid_room_code("K3X9Q"));
        assert!(!is_valid_room_code("K3X9Q0Z"));
        assert!(!is_valid_room_code("K3X-Q0"));
        assert!(is_valid_room_code("K3X9Q0"));
    }

    #[test]
    fn status_transitions_are_monotone() {
        use RoomStatus::*;
        assert!(Waiting.can_transition_to(Started));
        assert!(Started.can_transition_to(Ended));
        assert!(!Waiting.can_transition_to(Ended));
        assert!(!Started.can_transition_to(Waiting));
        assert!(!Ended.can_transition_to(Waiting));
        assert!(!Ended.can_transition_to(Started));
    }

    #[test]
    fn settings_coerce_fixed_fields() {
        let s = RoomSettings::normalized(900, 1100);
        assert_eq!(s.question_count, QUESTION_COUNT);
        assert_eq!(s.duration_mins, DURATION_MINS);
        assert_eq!(s.min_rating, 900);
        assert_eq!(s.max_rating, 1100);
    }

    #[test]
    fn new_room_contains_host() {
        let host = Uuid::new_v4();
        let room = Room::new("K3X9Q0".into(), host, RoomSettings::default());
        assert!(room.is_participant(host));
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(room.started_at.is_none());
        assert!(room.deadline().is_none());
    }
}
