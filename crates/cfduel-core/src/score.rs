use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// A verified solve. At most one exists per
/// (room, user, contest, index); immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub room_code: String,
    pub user_id: UserId,
    pub contest_id: u32,
    pub index: String,
    /// The judge's submission creation instant, never server wall clock.
    pub solved_at: DateTime<Utc>,
    pub points: u32,
}
