use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use cfduel_core::events::ServerEvent;
use cfduel_core::leaderboard::{self, LeaderboardEntry};
use cfduel_core::problem::{RoomProblem, SLOT_POINTS};
use cfduel_core::room::RoomStatus;
use cfduel_core::score::Score;
use cfduel_core::scoring::solve_points;
use cfduel_core::user::{User, UserId};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::hub::Hub;
use crate::judge::{JudgeClient, JudgeProblem};
use crate::store::{ScoreInsert, Store, StoreError};

/// Private reply for a `check-problem` request. Successful solves also
/// broadcast to the whole room before this is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Scored { points: u32 },
    /// Already solved earlier; the stored points are replayed to the
    /// requester only, with no re-broadcast.
    AlreadyScored { points: u32 },
    NotSolved,
}

/// Game orchestration: problem provisioning, solve verification, and
/// the end-of-game sweep.
pub struct GameService {
    store: Arc<dyn Store>,
    judge: Arc<dyn JudgeClient>,
    hub: Arc<Hub>,
    config: Arc<ServerConfig>,
}

impl GameService {
    pub fn new(
        store: Arc<dyn Store>,
        judge: Arc<dyn JudgeClient>,
        hub: Arc<Hub>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            store,
            judge,
            hub,
            config,
        }
    }

    /// Host-only. Emits `game-starting` before the (slow) provisioning
    /// step, then commits problems + status atomically, arms the end
    /// timer, and emits `game-started`.
    pub async fn start_game(self: &Arc<Self>, code: &str, by: UserId) -> Result<(), AppError> {
        let room = self
            .store
            .find_room(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {code} not found")))?;
        if room.host != by {
            return Err(AppError::Forbidden(
                "Only the host can start the game".to_string(),
            ));
        }
        if room.participants.len() < 2 {
            return Err(AppError::Conflict(
                "Need at least two players to start".to_string(),
            ));
        }
        if room.status != RoomStatus::Waiting {
            return Err(AppError::Conflict("Game already started".to_string()));
        }

        self.hub.publish(
            code,
            &ServerEvent::GameStarting {
                room_code: code.to_string(),
            },
        );

        let pool = self.judge.all_problems().await?;
        let picked = pick_problem_pair(&pool, room.settings.min_rating, room.settings.max_rating)
            .ok_or(AppError::InsufficientProblems)?;

        let problems: Vec<RoomProblem> = picked
            .into_iter()
            .zip(SLOT_POINTS)
            .map(|(p, (base_points, min_points))| RoomProblem {
                contest_id: p.contest_id,
                index: p.index,
                rating: p.rating.unwrap_or_default(),
                base_points,
                min_points,
            })
            .collect();

        let started_at = Utc::now();
        let room = self
            .store
            .begin_game(code, problems.clone(), started_at)
            .await?;
        self.arm_end_timer(code.to_string(), started_at, room.duration());

        self.hub.publish(
            code,
            &ServerEvent::GameStarted {
                room_code: code.to_string(),
                problems,
                start_time: started_at.to_rfc3339(),
                duration: room.settings.duration_mins,
            },
        );
        tracing::info!(room = code, "Game started");
        Ok(())
    }

    /// Schedule `auto_finalize` at the game deadline. Replaces any
    /// previous timer for the room.
    pub fn arm_end_timer(
        self: &Arc<Self>,
        code: String,
        started_at: DateTime<Utc>,
        duration: chrono::Duration,
    ) {
        let service = Arc::clone(self);
        let deadline = started_at + duration;
        let task_code = code.clone();
        let end_task = tokio::spawn(async move {
            let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(remaining).await;
            if let Err(e) = service.auto_finalize(&task_code).await {
                tracing::error!(room = %task_code, error = %e, "Auto-finalization failed");
            }
        });
        self.hub.start_game_runtime(&code, started_at, duration, end_task);
    }

    /// Verify a claimed solve against the judge's recent submissions.
    /// The earliest accepted submission inside the game window wins;
    /// its creation instant is the authoritative solve time.
    pub async fn check_submission(
        &self,
        code: &str,
        user: &User,
        contest_id: u32,
        index: &str,
    ) -> Result<CheckOutcome, AppError> {
        let room = self
            .store
            .find_room(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {code} not found")))?;
        if room.status != RoomStatus::Started {
            return Err(AppError::Conflict("The game is not running".to_string()));
        }
        let started_at = room
            .started_at
            .ok_or_else(|| AppError::Internal("started room has no start instant".to_string()))?;

        let problems = self.store.list_room_problems(code).await?;
        let problem = problems
            .iter()
            .find(|p| p.matches(contest_id, index))
            .ok_or_else(|| {
                AppError::Conflict("That problem is not part of this game".to_string())
            })?;

        // Uniqueness short-circuit: no judge call for a solved problem
        if let Some(existing) = self
            .store
            .list_scores_of(code, user.id)
            .await?
            .into_iter()
            .find(|s| s.contest_id == contest_id && s.index == index)
        {
            return Ok(CheckOutcome::AlreadyScored {
                points: existing.points,
            });
        }

        let submissions = self
            .judge
            .recent_submissions(&user.handle, self.config.judge.submission_count)
            .await?;

        let deadline = started_at + room.duration();
        let solved_at = submissions
            .iter()
            .filter(|s| s.contest_id == contest_id && s.index == index && s.accepted())
            .filter(|s| s.created_at > started_at && s.created_at <= deadline)
            .map(|s| s.created_at)
            .min();
        let Some(solved_at) = solved_at else {
            return Ok(CheckOutcome::NotSolved);
        };

        let points = solve_points(problem.base_points, problem.min_points, started_at, solved_at);
        let score = Score {
            room_code: code.to_string(),
            user_id: user.id,
            contest_id,
            index: index.to_string(),
            solved_at,
            points,
        };
        match self.store.insert_score(score).await? {
            // A concurrent session of the same user got there first
            ScoreInsert::AlreadyScored(existing) => Ok(CheckOutcome::AlreadyScored {
                points: existing.points,
            }),
            ScoreInsert::Inserted(_) => {
                self.hub.publish(
                    code,
                    &ServerEvent::ProblemSolved {
                        user_id: user.id,
                        handle: user.handle.clone(),
                        contest_id,
                        index: index.to_string(),
                        points,
                    },
                );
                let board = self.leaderboard(code).await?;
                self.hub.publish(code, &ServerEvent::LeaderboardUpdate(board));
                tracing::info!(
                    room = code,
                    user = %user.handle,
                    problem = %format!("{contest_id}{index}"),
                    points,
                    "Problem solved"
                );
                Ok(CheckOutcome::Scored { points })
            },
        }
    }

    /// End-of-game sweep. Scores every unclaimed accepted submission
    /// inside the window for every participant (paced, one participant
    /// per judge call), flips the room to ended, and emits
    /// `game-ended`. Safe to run twice: the score uniqueness index
    /// absorbs replays and an already-ended room just re-emits the
    /// final state.
    pub async fn auto_finalize(&self, code: &str) -> Result<(), AppError> {
        let Some(room) = self.store.find_room(code).await? else {
            // Room cascade-deleted while the timer was pending
            self.hub.remove_game_runtime(code);
            return Ok(());
        };

        if room.status == RoomStatus::Started {
            let started_at = room.started_at.ok_or_else(|| {
                AppError::Internal("started room has no start instant".to_string())
            })?;
            let deadline = started_at + room.duration();
            let problems = self.store.list_room_problems(code).await?;
            let users = self.store.find_users(&room.participants).await?;
            let pace = Duration::from_millis(self.config.judge.sweep_pace_ms);

            for (i, user) in users.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(pace).await;
                }
                if let Err(e) = self
                    .sweep_participant(code, user, &problems, started_at, deadline)
                    .await
                {
                    tracing::warn!(
                        room = code,
                        user = %user.handle,
                        error = %e,
                        "Finalization sweep skipped participant"
                    );
                }
            }

            match self.store.set_status(code, RoomStatus::Ended, None).await {
                Ok(_) => {},
                // A concurrent finalize won the transition; keep going
                // so this caller also emits the final state.
                Err(StoreError::InvalidTransition { .. }) => {},
                Err(e) => return Err(e.into()),
            }
        }

        let board = self.leaderboard(code).await?;
        let winner = board.first().cloned();
        self.hub.publish(
            code,
            &ServerEvent::GameEnded {
                room_code: code.to_string(),
                leaderboard: board,
                winner,
            },
        );
        self.hub.remove_game_runtime(code);
        tracing::info!(room = code, "Game finalized");
        Ok(())
    }

    async fn sweep_participant(
        &self,
        code: &str,
        user: &User,
        problems: &[RoomProblem],
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let submissions = self
            .judge
            .recent_submissions(&user.handle, self.config.judge.submission_count)
            .await?;
        let scored = self.store.list_scores_of(code, user.id).await?;

        for problem in problems {
            if scored
                .iter()
                .any(|s| s.contest_id == problem.contest_id && s.index == problem.index)
            {
                continue;
            }
            let solved_at = submissions
                .iter()
                .filter(|s| {
                    s.contest_id == problem.contest_id && s.index == problem.index && s.accepted()
                })
                .filter(|s| s.created_at > started_at && s.created_at <= deadline)
                .map(|s| s.created_at)
                .min();
            if let Some(solved_at) = solved_at {
                let points =
                    solve_points(problem.base_points, problem.min_points, started_at, solved_at);
                self.store
                    .insert_score(Score {
                        room_code: code.to_string(),
                        user_id: user.id,
                        contest_id: problem.contest_id,
                        index: problem.index.clone(),
                        solved_at,
                        points,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Derive the room's current leaderboard.
    pub async fn leaderboard(&self, code: &str) -> Result<Vec<LeaderboardEntry>, AppError> {
        let room = self
            .store
            .find_room(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {code} not found")))?;
        let users = self.store.find_users(&room.participants).await?;
        let scores = self.store.list_scores(code).await?;
        Ok(leaderboard::project(&users, &scores))
    }
}

/// Split the rated pool at the midpoint of the configured band and draw
/// one problem uniformly from each half. Unrated problems are ignored.
fn pick_problem_pair(
    pool: &[JudgeProblem],
    min_rating: i32,
    max_rating: i32,
) -> Option<[JudgeProblem; 2]> {
    let mid = (min_rating + max_rating).div_euclid(2);
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    for p in pool {
        let Some(rating) = p.rating else { continue };
        let rating = rating as i32;
        if rating >= min_rating && rating <= mid {
            lower.push(p);
        } else if rating > mid && rating <= max_rating {
            upper.push(p);
        }
    }
    if lower.is_empty() || upper.is_empty() {
        return None;
    }
    use rand::Rng;
    let mut rng = rand::rng();
    let low = lower[rng.random_range(0..lower.len())].clone();
    let high = upper[rng.random_range(0..upper.len())].clone();
    Some([low, high])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{JudgeError, JudgeSubmission, JudgeUser};
    use crate::outbox::Outbox;
    use crate::store::MemStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Judge stub with canned problems and per-handle submissions.
    #[derive(Default)]
    struct StubJudge {
        problems: Vec<JudgeProblem>,
        submissions: Mutex<HashMap<String, Vec<JudgeSubmission>>>,
    }

    impl StubJudge {
        fn with_problems(problems: Vec<JudgeProblem>) -> Self {
            Self {
                problems,
                submissions: Mutex::new(HashMap::new()),
            }
        }

        fn set_submissions(&self, handle: &str, subs: Vec<JudgeSubmission>) {
            self.submissions
                .lock()
                .unwrap()
                .insert(handle.to_string(), subs);
        }
    }

    #[async_trait]
    impl JudgeClient for StubJudge {
        async fn resolve_user(&self, handle: &str) -> Result<JudgeUser, JudgeError> {
            Ok(JudgeUser {
                handle: handle.to_string(),
                rating: Some(1200),
                avatar: String::new(),
            })
        }

        async fn all_problems(&self) -> Result<Vec<JudgeProblem>, JudgeError> {
            Ok(self.problems.clone())
        }

        async fn recent_submissions(
            &self,
            handle: &str,
            _count: u32,
        ) -> Result<Vec<JudgeSubmission>, JudgeError> {
            Ok(self
                .submissions
                .lock()
                .unwrap()
                .get(handle)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn rated(contest: u32, index: &str, rating: u32) -> JudgeProblem {
        JudgeProblem {
            contest_id: contest,
            index: index.into(),
            rating: Some(rating),
        }
    }

    fn accepted(contest: u32, index: &str, at: DateTime<Utc>) -> JudgeSubmission {
        JudgeSubmission {
            contest_id: contest,
            index: index.into(),
            verdict: Some("OK".into()),
            created_at: at,
        }
    }

    struct Fixture {
        service: Arc<GameService>,
        store: Arc<MemStore>,
        judge: Arc<StubJudge>,
        hub: Arc<Hub>,
    }

    fn fixture(judge: StubJudge) -> Fixture {
        let store = Arc::new(MemStore::new());
        let judge = Arc::new(judge);
        let hub = Arc::new(Hub::new());
        let mut config = ServerConfig::default();
        config.judge.sweep_pace_ms = 0;
        let service = Arc::new(GameService::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&judge) as Arc<dyn JudgeClient>,
            Arc::clone(&hub),
            Arc::new(config),
        ));
        Fixture {
            service,
            store,
            judge,
            hub,
        }
    }

    async fn duel_room(fx: &Fixture) -> (User, User, String) {
        let alice = fx
            .store
            .upsert_user_by_handle("alice", Some(1200), "https://x/a.png")
            .await
            .unwrap();
        let bob = fx
            .store
            .upsert_user_by_handle("bob", Some(1300), "https://x/b.png")
            .await
            .unwrap();
        fx.store
            .create_room("K3X9Q0", alice.id, cfduel_core::room::RoomSettings::normalized(800, 1400))
            .await
            .unwrap();
        fx.store.add_participant("K3X9Q0", bob.id).await.unwrap();
        (alice, bob, "K3X9Q0".to_string())
    }

    fn observe(fx: &Fixture, topic: &str) -> Outbox {
        let session = Uuid::new_v4();
        let outbox = Outbox::new(64);
        fx.hub.register_session(session, Uuid::new_v4(), outbox.clone());
        fx.hub.subscribe(topic, session);
        outbox
    }

    #[tokio::test]
    async fn start_game_provisions_two_problems() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
            rated(200, "B", 2000), // outside band, ignored
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        let outbox = observe(&fx, &code);

        fx.service.start_game(&code, alice.id).await.unwrap();

        match outbox.next().await.unwrap() {
            ServerEvent::GameStarting { room_code } => assert_eq!(room_code, code),
            other => panic!("Expected game-starting, got {other:?}"),
        }
        match outbox.next().await.unwrap() {
            ServerEvent::GameStarted {
                problems, duration, ..
            } => {
                assert_eq!(problems.len(), 2);
                // Slot order: lower half first with the smaller schedule
                assert_eq!(problems[0].index, "A");
                assert_eq!(problems[0].base_points, 500);
                assert_eq!(problems[0].min_points, 250);
                assert_eq!(problems[1].index, "C");
                assert_eq!(problems[1].base_points, 1000);
                assert_eq!(problems[1].min_points, 500);
                assert_eq!(duration, 15);
            },
            other => panic!("Expected game-started, got {other:?}"),
        }

        let room = fx.store.find_room(&code).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Started);
        assert!(room.started_at.is_some());
        assert_eq!(fx.hub.active_games(), vec![code]);
    }

    #[tokio::test]
    async fn start_game_rejects_non_host_and_solo() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, bob, code) = duel_room(&fx).await;

        let err = fx.service.start_game(&code, bob.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // Solo room: only the host inside
        fx.store
            .create_room("SOLO01", alice.id, cfduel_core::room::RoomSettings::default())
            .await
            .unwrap();
        let err = fx.service.start_game("SOLO01", alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn start_game_insufficient_problems_keeps_room_waiting() {
        // Everything rated in the lower half → upper half is empty
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "B", 950),
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        let outbox = observe(&fx, &code);

        let err = fx.service.start_game(&code, alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientProblems));

        // game-starting went out, but no game-started and no transition
        match outbox.next().await.unwrap() {
            ServerEvent::GameStarting { .. } => {},
            other => panic!("Expected game-starting, got {other:?}"),
        }
        let room = fx.store.find_room(&code).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(fx.store.list_room_problems(&code).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_scores_earliest_accepted_submission() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();
        let started_at = fx
            .store
            .find_room(&code)
            .await
            .unwrap()
            .unwrap()
            .started_at
            .unwrap();

        let problems = fx.store.list_room_problems(&code).await.unwrap();
        let p1 = &problems[0];
        fx.judge.set_submissions(
            "alice",
            vec![
                // A retry after the real solve; the earlier one counts
                accepted(p1.contest_id, &p1.index, started_at + chrono::Duration::seconds(400)),
                accepted(p1.contest_id, &p1.index, started_at + chrono::Duration::seconds(195)),
            ],
        );

        let outbox = observe(&fx, &code);
        let outcome = fx
            .service
            .check_submission(&code, &alice, p1.contest_id, &p1.index)
            .await
            .unwrap();
        // 3 whole minutes elapsed → 500 − 15
        assert_eq!(outcome, CheckOutcome::Scored { points: 485 });

        match outbox.next().await.unwrap() {
            ServerEvent::ProblemSolved { handle, points, .. } => {
                assert_eq!(handle, "alice");
                assert_eq!(points, 485);
            },
            other => panic!("Expected problem-solved, got {other:?}"),
        }
        match outbox.next().await.unwrap() {
            ServerEvent::LeaderboardUpdate(board) => {
                assert_eq!(board.len(), 2);
                assert_eq!(board[0].handle, "alice");
                assert_eq!(board[0].total_points, 485);
                assert_eq!(board[1].total_points, 0);
            },
            other => panic!("Expected leaderboard-update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_rejects_submission_at_start_instant() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();
        let started_at = fx
            .store
            .find_room(&code)
            .await
            .unwrap()
            .unwrap()
            .started_at
            .unwrap();

        let problems = fx.store.list_room_problems(&code).await.unwrap();
        let p1 = &problems[0];
        // Exactly at the start instant: strict > rejects it
        fx.judge
            .set_submissions("alice", vec![accepted(p1.contest_id, &p1.index, started_at)]);

        let outcome = fx
            .service
            .check_submission(&code, &alice, p1.contest_id, &p1.index)
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::NotSolved);
    }

    #[tokio::test]
    async fn duplicate_check_replays_points_without_broadcast() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();
        let started_at = fx
            .store
            .find_room(&code)
            .await
            .unwrap()
            .unwrap()
            .started_at
            .unwrap();

        let problems = fx.store.list_room_problems(&code).await.unwrap();
        let p1 = &problems[0];
        fx.judge.set_submissions(
            "alice",
            vec![accepted(p1.contest_id, &p1.index, started_at + chrono::Duration::seconds(195))],
        );
        fx.service
            .check_submission(&code, &alice, p1.contest_id, &p1.index)
            .await
            .unwrap();

        let outbox = observe(&fx, &code);
        let outcome = fx
            .service
            .check_submission(&code, &alice, p1.contest_id, &p1.index)
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::AlreadyScored { points: 485 });

        // Nothing was re-broadcast: the next event the observer sees is a sentinel
        fx.hub.publish(&code, &ServerEvent::TimerSync { server_time: 1 });
        assert_eq!(
            outbox.next().await,
            Some(ServerEvent::TimerSync { server_time: 1 })
        );
    }

    #[tokio::test]
    async fn check_against_foreign_problem_is_rejected() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();

        let err = fx
            .service
            .check_submission(&code, &alice, 999, "Z")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn finalize_sweeps_unclaimed_solves_and_declares_winner() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, _bob, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();
        let started_at = fx
            .store
            .find_room(&code)
            .await
            .unwrap()
            .unwrap()
            .started_at
            .unwrap();

        let problems = fx.store.list_room_problems(&code).await.unwrap();
        let (p1, p2) = (&problems[0], &problems[1]);

        // Alice claimed P1 during play
        fx.judge.set_submissions(
            "alice",
            vec![accepted(p1.contest_id, &p1.index, started_at + chrono::Duration::seconds(195))],
        );
        fx.service
            .check_submission(&code, &alice, p1.contest_id, &p1.index)
            .await
            .unwrap();

        // Bob solved P2 at 14:30 but never clicked check
        fx.judge.set_submissions(
            "bob",
            vec![accepted(p2.contest_id, &p2.index, started_at + chrono::Duration::seconds(870))],
        );

        let outbox = observe(&fx, &code);
        fx.service.auto_finalize(&code).await.unwrap();

        match outbox.next().await.unwrap() {
            ServerEvent::GameEnded {
                leaderboard,
                winner,
                ..
            } => {
                assert_eq!(leaderboard[0].handle, "bob");
                assert_eq!(leaderboard[0].total_points, 930);
                assert_eq!(leaderboard[1].handle, "alice");
                assert_eq!(leaderboard[1].total_points, 485);
                assert_eq!(winner.unwrap().handle, "bob");
            },
            other => panic!("Expected game-ended, got {other:?}"),
        }

        let room = fx.store.find_room(&code).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Ended);
        assert!(fx.hub.active_games().is_empty());
    }

    #[tokio::test]
    async fn finalize_accepts_submission_exactly_at_deadline() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, bob, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();
        let room = fx.store.find_room(&code).await.unwrap().unwrap();
        let deadline = room.deadline().unwrap();

        let problems = fx.store.list_room_problems(&code).await.unwrap();
        let p2 = &problems[1];
        fx.judge
            .set_submissions("bob", vec![accepted(p2.contest_id, &p2.index, deadline)]);

        fx.service.auto_finalize(&code).await.unwrap();

        let scores = fx.store.list_scores_of(&code, bob.id).await.unwrap();
        assert_eq!(scores.len(), 1);
        // 15 whole minutes → 1000 − 75, still above the floor
        assert_eq!(scores[0].points, 925);
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let fx = fixture(StubJudge::with_problems(vec![
            rated(100, "A", 900),
            rated(100, "C", 1300),
        ]));
        let (alice, _, code) = duel_room(&fx).await;
        fx.service.start_game(&code, alice.id).await.unwrap();

        fx.service.auto_finalize(&code).await.unwrap();
        let first = fx.service.leaderboard(&code).await.unwrap();

        let outbox = observe(&fx, &code);
        fx.service.auto_finalize(&code).await.unwrap();
        let second = fx.service.leaderboard(&code).await.unwrap();
        assert_eq!(first, second);

        // The replay still emits game-ended so late clients converge
        match outbox.next().await.unwrap() {
            ServerEvent::GameEnded { leaderboard, .. } => assert_eq!(leaderboard, second),
            other => panic!("Expected game-ended, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalize_skips_failing_participant() {
        struct HalfBrokenJudge {
            inner: StubJudge,
        }

        #[async_trait]
        impl JudgeClient for HalfBrokenJudge {
            async fn resolve_user(&self, handle: &str) -> Result<JudgeUser, JudgeError> {
                self.inner.resolve_user(handle).await
            }
            async fn all_problems(&self) -> Result<Vec<JudgeProblem>, JudgeError> {
                self.inner.all_problems().await
            }
            async fn recent_submissions(
                &self,
                handle: &str,
                count: u32,
            ) -> Result<Vec<JudgeSubmission>, JudgeError> {
                if handle == "alice" {
                    return Err(JudgeError::Unavailable("boom".into()));
                }
                self.inner.recent_submissions(handle, count).await
            }
        }

        let store = Arc::new(MemStore::new());
        let hub = Arc::new(Hub::new());
        let stub = StubJudge::with_problems(vec![rated(100, "A", 900), rated(100, "C", 1300)]);
        let mut config = ServerConfig::default();
        config.judge.sweep_pace_ms = 0;

        let alice = store
            .upsert_user_by_handle("alice", Some(1200), "")
            .await
            .unwrap();
        let bob = store
            .upsert_user_by_handle("bob", Some(1300), "")
            .await
            .unwrap();
        store
            .create_room("K3X9Q0", alice.id, cfduel_core::room::RoomSettings::normalized(800, 1400))
            .await
            .unwrap();
        store.add_participant("K3X9Q0", bob.id).await.unwrap();

        let judge = Arc::new(HalfBrokenJudge { inner: stub });
        let service = Arc::new(GameService::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&judge) as Arc<dyn JudgeClient>,
            Arc::clone(&hub),
            Arc::new(config),
        ));

        service.start_game("K3X9Q0", alice.id).await.unwrap();
        let started_at = store
            .find_room("K3X9Q0")
            .await
            .unwrap()
            .unwrap()
            .started_at
            .unwrap();
        let problems = store.list_room_problems("K3X9Q0").await.unwrap();
        let p2 = &problems[1];
        judge.inner.set_submissions(
            "bob",
            vec![accepted(p2.contest_id, &p2.index, started_at + chrono::Duration::seconds(60))],
        );

        // Alice's fetch fails; bob is still swept and the game still ends
        service.auto_finalize("K3X9Q0").await.unwrap();
        let room = store.find_room("K3X9Q0").await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Ended);
        assert_eq!(store.list_scores_of("K3X9Q0", bob.id).await.unwrap().len(), 1);
    }

    #[test]
    fn pick_pair_splits_band_at_midpoint() {
        let pool = vec![
            rated(1, "A", 800),
            rated(1, "B", 1100),
            rated(2, "A", 1101),
            rated(2, "B", 1400),
            JudgeProblem {
                contest_id: 3,
                index: "A".into(),
                rating: None,
            },
        ];
        // mid = 1100: lower [800, 1100], upper (1100, 1400]
        for _ in 0..20 {
            let [low, high] = pick_problem_pair(&pool, 800, 1400).unwrap();
            assert!(low.rating.unwrap() <= 1100);
            assert!(high.rating.unwrap() > 1100);
        }
    }

    #[test]
    fn pick_pair_requires_both_halves() {
        let pool = vec![rated(1, "A", 900), rated(1, "B", 1000)];
        assert!(pick_problem_pair(&pool, 800, 1400).is_none());
        assert!(pick_problem_pair(&[], 800, 1400).is_none());
    }
}
