use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::score::Score;
use crate::user::User;

/// One solved problem inside a leaderboard entry, sorted by solve time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemScore {
    pub contest_id: u32,
    pub index: String,
    pub points: u32,
    pub solved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub handle: String,
    pub avatar: String,
    pub total_points: u32,
    pub solved_count: usize,
    pub problem_scores: Vec<ProblemScore>,
}

/// Derive the ordered leaderboard for a room from its persisted scores.
/// Every participant appears, scored or not. Ordering: descending total
/// points, then ascending earliest solve instant (first to their points
/// wins the tie), then ascending handle. Never stored; recomputed on
/// demand.
pub fn project(participants: &[User], scores: &[Score]) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<(LeaderboardEntry, Option<DateTime<Utc>>)> = participants
        .iter()
        .map(|user| {
            let mut problem_scores: Vec<ProblemScore> = scores
                .iter()
                .filter(|s| s.user_id == user.id)
                .map(|s| ProblemScore {
                    contest_id: s.contest_id,
                    index: s.index.clone(),
                    points: s.points,
                    solved_at: s.solved_at,
                })
                .collect();
            problem_scores.sort_by_key(|p| p.solved_at);

            let earliest = problem_scores.first().map(|p| p.solved_at);
            let entry = LeaderboardEntry {
                handle: user.handle.clone(),
                avatar: user.avatar.clone(),
                total_points: problem_scores.iter().map(|p| p.points).sum(),
                solved_count: problem_scores.len(),
                problem_scores,
            };
            (entry, earliest)
        })
        .collect();

    entries.sort_by(|(a, a_first), (b, b_first)| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| match (a_first, b_first) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.handle.cmp(&b.handle))
    });

    entries.into_iter().map(|(entry, _)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(min: i64, sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(min * 60 + sec)
    }

    fn user(handle: &str) -> User {
        User {
            id: Uuid::new_v4(),
            handle: handle.into(),
            rating: Some(1200),
            avatar: format!("https://example.com/{handle}.png"),
        }
    }

    fn score(room: &str, user: &User, contest: u32, index: &str, solved: DateTime<Utc>, points: u32) -> Score {
        Score {
            room_code: room.into(),
            user_id: user.id,
            contest_id: contest,
            index: index.into(),
            solved_at: solved,
            points,
        }
    }

    #[test]
    fn orders_by_total_points() {
        let (a, b) = (user("alice"), user("bob"));
        let scores = vec![
            score("K3X9Q0", &a, 100, "A", at(3, 15), 485),
            score("K3X9Q0", &b, 100, "C", at(14, 30), 930),
        ];
        let board = project(&[a, b], &scores);
        assert_eq!(board[0].handle, "bob");
        assert_eq!(board[0].total_points, 930);
        assert_eq!(board[1].handle, "alice");
        assert_eq!(board[1].total_points, 485);
    }

    #[test]
    fn unscored_participants_appear_with_zero() {
        let (a, b) = (user("alice"), user("bob"));
        let scores = vec![score("K3X9Q0", &a, 100, "A", at(3, 15), 485)];
        let board = project(&[a, b], &scores);
        assert_eq!(board.len(), 2);
        assert_eq!(board[1].handle, "bob");
        assert_eq!(board[1].total_points, 0);
        assert_eq!(board[1].solved_count, 0);
        assert!(board[1].problem_scores.is_empty());
    }

    #[test]
    fn equal_points_breaks_on_earliest_solve() {
        let (a, b) = (user("zoe"), user("bob"));
        let scores = vec![
            score("K3X9Q0", &a, 100, "A", at(2, 0), 490),
            score("K3X9Q0", &b, 100, "C", at(5, 0), 490),
        ];
        let board = project(&[a, b], &scores);
        // zoe solved earlier, wins the tie despite sorting after "bob" by handle
        assert_eq!(board[0].handle, "zoe");
    }

    #[test]
    fn zero_zero_breaks_on_handle() {
        let board = project(&[user("carol"), user("bob")], &[]);
        assert_eq!(board[0].handle, "bob");
        assert_eq!(board[1].handle, "carol");
    }

    #[test]
    fn problem_scores_sorted_by_solve_time() {
        let a = user("alice");
        let scores = vec![
            score("K3X9Q0", &a, 100, "C", at(10, 0), 950),
            score("K3X9Q0", &a, 100, "A", at(3, 0), 485),
        ];
        let board = project(std::slice::from_ref(&a), &scores);
        assert_eq!(board[0].problem_scores[0].index, "A");
        assert_eq!(board[0].problem_scores[1].index, "C");
        assert_eq!(board[0].total_points, 1435);
        assert_eq!(board[0].solved_count, 2);
    }

    #[test]
    fn ignores_scores_of_departed_users() {
        let (a, b) = (user("alice"), user("bob"));
        let scores = vec![score("K3X9Q0", &b, 100, "A", at(1, 0), 495)];
        let board = project(std::slice::from_ref(&a), &scores);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].handle, "alice");
    }
}
