use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use cfduel_core::events::ServerEvent;
use cfduel_core::user::UserId;

use crate::outbox::Outbox;

pub type SessionId = Uuid;

/// What a session left behind when it was unregistered.
pub struct SessionExit {
    pub user_id: UserId,
    /// Room topics the session was subscribed to.
    pub topics: Vec<String>,
    /// True when this was the user's last live session.
    pub last_session: bool,
}

struct GameRuntime {
    started_at: DateTime<Utc>,
    duration: Duration,
    end_task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub sessions: usize,
    pub active_games: usize,
}

/// Single authority for in-process ephemeral state: topic
/// subscriptions, the user→sessions multi-index, game end timers, and
/// grace tickets. One coarse lock guards everything, which makes
/// subscribe/unsubscribe/publish and timer bookkeeping mutually
/// exclusive: once `unsubscribe` returns, no further event reaches
/// that session for the topic.
///
/// Timer tasks are spawned by the services; the hub only stores and
/// aborts their handles. Everything here is discarded on shutdown —
/// started rooms are recoverable from the store because their start
/// instant is persisted.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

#[derive(Default)]
struct HubInner {
    topics: HashMap<String, HashSet<SessionId>>,
    outboxes: HashMap<SessionId, Outbox>,
    session_user: HashMap<SessionId, UserId>,
    user_sessions: HashMap<UserId, HashSet<SessionId>>,
    session_topics: HashMap<SessionId, HashSet<String>>,
    runtimes: HashMap<String, GameRuntime>,
    grace: HashMap<(String, UserId), JoinHandle<()>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().expect("hub lock poisoned")
    }

    // ---- sessions --------------------------------------------------------

    pub fn register_session(&self, session: SessionId, user: UserId, outbox: Outbox) {
        let mut inner = self.lock();
        inner.outboxes.insert(session, outbox);
        inner.session_user.insert(session, user);
        inner.user_sessions.entry(user).or_default().insert(session);
    }

    pub fn unregister_session(&self, session: SessionId) -> Option<SessionExit> {
        let mut inner = self.lock();
        let user_id = inner.session_user.remove(&session)?;

        if let Some(outbox) = inner.outboxes.remove(&session) {
            outbox.close();
        }

        let topics: Vec<String> = inner
            .session_topics
            .remove(&session)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for topic in &topics {
            if let Some(subscribers) = inner.topics.get_mut(topic) {
                subscribers.remove(&session);
                if subscribers.is_empty() {
                    inner.topics.remove(topic);
                }
            }
        }

        let last_session = match inner.user_sessions.get_mut(&user_id) {
            Some(sessions) => {
                sessions.remove(&session);
                if sessions.is_empty() {
                    inner.user_sessions.remove(&user_id);
                    true
                } else {
                    false
                }
            },
            None => true,
        };

        Some(SessionExit {
            user_id,
            topics,
            last_session,
        })
    }

    pub fn session_count_of(&self, user: UserId) -> usize {
        self.lock()
            .user_sessions
            .get(&user)
            .map_or(0, HashSet::len)
    }

    // ---- topics ----------------------------------------------------------

    pub fn subscribe(&self, topic: &str, session: SessionId) {
        let mut inner = self.lock();
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(session);
        inner
            .session_topics
            .entry(session)
            .or_default()
            .insert(topic.to_string());
    }

    pub fn unsubscribe(&self, topic: &str, session: SessionId) {
        let mut inner = self.lock();
        if let Some(subscribers) = inner.topics.get_mut(topic) {
            subscribers.remove(&session);
            if subscribers.is_empty() {
                inner.topics.remove(topic);
            }
        }
        if let Some(topics) = inner.session_topics.get_mut(&session) {
            topics.remove(topic);
        }
    }

    /// Deliver to every current subscriber of the topic. Non-blocking:
    /// each subscriber's outbox absorbs or sheds the event.
    pub fn publish(&self, topic: &str, event: &ServerEvent) {
        let inner = self.lock();
        if let Some(subscribers) = inner.topics.get(topic) {
            for session in subscribers {
                if let Some(outbox) = inner.outboxes.get(session) {
                    outbox.push(event.clone());
                }
            }
        }
    }

    /// Private delivery to one session.
    pub fn send_to_session(&self, session: SessionId, event: ServerEvent) {
        let inner = self.lock();
        if let Some(outbox) = inner.outboxes.get(&session) {
            outbox.push(event);
        }
    }

    /// Drop a topic entirely (room destroyed). Subscribers stay
    /// connected but stop receiving events for it.
    pub fn drop_topic(&self, topic: &str) {
        let mut inner = self.lock();
        if let Some(subscribers) = inner.topics.remove(topic) {
            for session in subscribers {
                if let Some(topics) = inner.session_topics.get_mut(&session) {
                    topics.remove(topic);
                }
            }
        }
    }

    // ---- game runtimes ---------------------------------------------------

    /// Track a started game and its end-timer task. Idempotent by room
    /// code: a second call replaces and cancels the previous timer.
    pub fn start_game_runtime(
        &self,
        code: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
        end_task: JoinHandle<()>,
    ) {
        let mut inner = self.lock();
        if let Some(previous) = inner.runtimes.insert(
            code.to_string(),
            GameRuntime {
                started_at,
                duration,
                end_task,
            },
        ) {
            previous.end_task.abort();
        }
    }

    /// Cancel the end timer and forget the runtime (room destroyed).
    pub fn cancel_game_runtime(&self, code: &str) -> bool {
        match self.lock().runtimes.remove(code) {
            Some(runtime) => {
                runtime.end_task.abort();
                true
            },
            None => false,
        }
    }

    /// Forget the runtime without aborting its task. Used by the end
    /// timer itself once finalization completes.
    pub fn remove_game_runtime(&self, code: &str) {
        self.lock().runtimes.remove(code);
    }

    /// Room codes with a live game runtime, for the timer-sync tick.
    pub fn active_games(&self) -> Vec<String> {
        self.lock().runtimes.keys().cloned().collect()
    }

    pub fn game_deadline(&self, code: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .runtimes
            .get(code)
            .map(|r| r.started_at + r.duration)
    }

    // ---- grace tickets ---------------------------------------------------

    /// Track a pending removal. Replaces (and cancels) any prior ticket
    /// for the same (room, user).
    pub fn open_grace(&self, code: &str, user: UserId, expire_task: JoinHandle<()>) {
        let mut inner = self.lock();
        if let Some(previous) = inner.grace.insert((code.to_string(), user), expire_task) {
            previous.abort();
        }
    }

    /// Cancel-and-remove a ticket. Returns whether one existed.
    pub fn cancel_grace(&self, code: &str, user: UserId) -> bool {
        match self.lock().grace.remove(&(code.to_string(), user)) {
            Some(task) => {
                task.abort();
                true
            },
            None => false,
        }
    }

    /// Claim a ticket from inside its own expiry task: removes the
    /// entry without aborting, returning false when the ticket was
    /// already cancelled.
    pub fn claim_grace(&self, code: &str, user: UserId) -> bool {
        self.lock().grace.remove(&(code.to_string(), user)).is_some()
    }

    /// Cancel every ticket the user holds; returns the affected rooms.
    pub fn cancel_grace_of(&self, user: UserId) -> Vec<String> {
        let mut inner = self.lock();
        let keys: Vec<(String, UserId)> = inner
            .grace
            .keys()
            .filter(|(_, u)| *u == user)
            .cloned()
            .collect();
        keys.into_iter()
            .map(|key| {
                if let Some(task) = inner.grace.remove(&key) {
                    task.abort();
                }
                key.0
            })
            .collect()
    }

    /// Cancel every ticket for a destroyed room.
    pub fn cancel_grace_for_room(&self, code: &str) {
        let mut inner = self.lock();
        let keys: Vec<(String, UserId)> = inner
            .grace
            .keys()
            .filter(|(c, _)| c == code)
            .cloned()
            .collect();
        for key in keys {
            if let Some(task) = inner.grace.remove(&key) {
                task.abort();
            }
        }
    }

    pub fn has_grace(&self, code: &str, user: UserId) -> bool {
        self.lock().grace.contains_key(&(code.to_string(), user))
    }

    // ---- lifecycle -------------------------------------------------------

    pub fn stats(&self) -> HubStats {
        let inner = self.lock();
        HubStats {
            sessions: inner.session_user.len(),
            active_games: inner.runtimes.len(),
        }
    }

    /// Cancel all outstanding timers and close every outbox.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        for (_, runtime) in inner.runtimes.drain() {
            runtime.end_task.abort();
        }
        for (_, task) in inner.grace.drain() {
            task.abort();
        }
        for (_, outbox) in inner.outboxes.drain() {
            outbox.close();
        }
        inner.topics.clear();
        inner.session_user.clear();
        inner.user_sessions.clear();
        inner.session_topics.clear();
    }
}
