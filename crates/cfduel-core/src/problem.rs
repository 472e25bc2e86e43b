use serde::{Deserialize, Serialize};

/// Point schedule per problem slot: (base, floor). Slot 0 is drawn from
/// the lower rating half, slot 1 from the upper half.
pub const SLOT_POINTS: [(u32, u32); 2] = [(500, 250), (1000, 500)];

/// The judge identifies a problem by its contest and its index within
/// that contest ("A", "B1", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemRef {
    pub contest_id: u32,
    pub index: String,
}

impl std::fmt::Display for ProblemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.contest_id, self.index)
    }
}

/// A problem provisioned into a room at game start, with its point
/// schedule frozen at selection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomProblem {
    pub contest_id: u32,
    pub index: String,
    pub rating: u32,
    pub base_points: u32,
    pub min_points: u32,
}

impl RoomProblem {
    pub fn problem_ref(&self) -> ProblemRef {
        ProblemRef {
            contest_id: self.contest_id,
            index: self.index.clone(),
        }
    }

    pub fn matches(&self, contest_id: u32, index: &str) -> bool {
        self.contest_id == contest_id && self.index == index
    }
}
