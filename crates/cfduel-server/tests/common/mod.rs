use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cfduel_core::events::{ClientEvent, ServerEvent};
use cfduel_core::user::User;

use cfduel_server::config::ServerConfig;
use cfduel_server::judge::{JudgeClient, JudgeError, JudgeProblem, JudgeSubmission, JudgeUser};
use cfduel_server::state::AppState;
use cfduel_server::store::MemStore;
use cfduel_server::{build_app, spawn_timer_sync};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Judge stub shared with the running server; tests mutate it while
/// the server is live.
#[derive(Default)]
pub struct StubJudge {
    problems: Mutex<Vec<JudgeProblem>>,
    submissions: Mutex<HashMap<String, Vec<JudgeSubmission>>>,
    unknown_handles: Mutex<HashSet<String>>,
}

impl StubJudge {
    pub fn set_problems(&self, problems: Vec<JudgeProblem>) {
        *self.problems.lock().unwrap() = problems;
    }

    pub fn set_submissions(&self, handle: &str, subs: Vec<JudgeSubmission>) {
        self.submissions
            .lock()
            .unwrap()
            .insert(handle.to_string(), subs);
    }

    pub fn mark_unknown(&self, handle: &str) {
        self.unknown_handles
            .lock()
            .unwrap()
            .insert(handle.to_string());
    }
}

#[async_trait]
impl JudgeClient for StubJudge {
    async fn resolve_user(&self, handle: &str) -> Result<JudgeUser, JudgeError> {
        if self.unknown_handles.lock().unwrap().contains(handle) {
            return Err(JudgeError::UnknownHandle(handle.to_string()));
        }
        Ok(JudgeUser {
            handle: handle.to_string(),
            rating: Some(1200),
            avatar: format!("https://example.com/{handle}.png"),
        })
    }

    async fn all_problems(&self) -> Result<Vec<JudgeProblem>, JudgeError> {
        Ok(self.problems.lock().unwrap().clone())
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

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub judge: Arc<StubJudge>,
    pub http: reqwest::Client,
}

impl TestServer {
    /// Start a test server with a generous rate limit and no sweep pacing.
    pub async fn new() -> Self {
        let mut config = ServerConfig::default();
        config.limits.api_rate_limit_burst = 10_000;
        Self::with_config(config).await
    }

    pub async fn with_config(mut config: ServerConfig) -> Self {
        config.judge.sweep_pace_ms = 0;
        let store = Arc::new(MemStore::new());
        let judge = Arc::new(StubJudge::default());
        let (app, state) = build_app(
            config,
            store,
            Arc::clone(&judge) as Arc<dyn JudgeClient>,
        );
        spawn_timer_sync(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            judge,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={token}", self.addr)
    }

    /// Login through the REST surface, returning the user and token.
    pub async fn login(&self, handle: &str) -> (User, String) {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({ "handle": handle }))
            .send()
            .await
            .expect("login request");
        assert!(resp.status().is_success(), "login failed: {}", resp.status());
        let body: serde_json::Value = resp.json().await.unwrap();
        let user: User = serde_json::from_value(body["user"].clone()).unwrap();
        let token = body["token"].as_str().unwrap().to_string();
        (user, token)
    }

    /// Create a room through the REST surface, returning its code.
    pub async fn create_room(&self, token: &str) -> String {
        let resp = self
            .http
            .post(self.url("/rooms/create"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "minRating": 800, "maxRating": 1400 }))
            .send()
            .await
            .expect("create room request");
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        body["code"].as_str().unwrap().to_string()
    }

    pub async fn join_room(&self, token: &str, code: &str) {
        let resp = self
            .http
            .post(self.url(&format!("/rooms/{code}/join")))
            .bearer_auth(token)
            .send()
            .await
            .expect("join room request");
        assert!(resp.status().is_success());
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket connect");
    stream
}

pub async fn ws_send(stream: &mut WsStream, event: &ClientEvent) {
    let frame = serde_json::to_string(event).unwrap();
    stream.send(Message::text(frame)).await.expect("ws send");
}

/// Read the next server event, skipping non-text frames.
pub async fn ws_read(stream: &mut WsStream) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("decode server event");
        }
    }
}

/// Read events until one with the given wire name arrives. Unrelated
/// traffic (timer-sync and the like) is skipped.
pub async fn ws_expect(stream: &mut WsStream, name: &str) -> ServerEvent {
    for _ in 0..50 {
        let event = ws_read(stream).await;
        if event.name() == name {
            return event;
        }
    }
    panic!("never saw {name}");
}

/// Judge fixture: a problem rated inside the default band.
pub fn rated(contest: u32, index: &str, rating: u32) -> JudgeProblem {
    JudgeProblem {
        contest_id: contest,
        index: index.into(),
        rating: Some(rating),
    }
}

/// Judge fixture: an accepted submission.
pub fn accepted(contest: u32, index: &str, at: chrono::DateTime<chrono::Utc>) -> JudgeSubmission {
    JudgeSubmission {
        contest_id: contest,
        index: index.into(),
        verdict: Some("OK".into()),
        created_at: at,
    }
}
