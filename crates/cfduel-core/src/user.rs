use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

/// A player known to the platform. Upserted at login from the judge's
/// `user.info` response; the handle is stored exactly as the judge
/// returns it (case-sensitive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub handle: String,
    /// Unrated accounts have no rating on the judge.
    pub rating: Option<i32>,
    pub avatar: String,
}

impl User {
    pub fn new(handle: impl Into<String>, rating: Option<i32>, avatar: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: handle.into(),
            rating,
            avatar: avatar.into(),
        }
    }
}
