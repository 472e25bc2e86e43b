use chrono::{DateTime, Utc};

/// Points lost per whole elapsed minute.
pub const DECAY_PER_MIN: i64 = 5;

/// Time-decayed points for a solve. Decay applies per whole minute
/// elapsed since game start and is clamped at the problem's floor.
/// Callers guarantee `solved_at > started_at`.
pub fn solve_points(
    base_points: u32,
    min_points: u32,
    started_at: DateTime<Utc>,
    solved_at: DateTime<Utc>,
) -> u32 {
    let elapsed_min = (solved_at - started_at).num_seconds().max(0) / 60;
    let decayed = i64::from(base_points) - DECAY_PER_MIN * elapsed_min;
    decayed.max(i64::from(min_points)) as u32
}
