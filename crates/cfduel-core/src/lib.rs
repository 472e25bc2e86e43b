pub mod events;
pub mod leaderboard;
pub mod problem;
pub mod room;
pub mod score;
pub mod scoring;
pub mod user;
