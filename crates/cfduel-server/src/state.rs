use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthTokens;
use crate::config::ServerConfig;
use crate::game_service::GameService;
use crate::hub::Hub;
use crate::judge::JudgeClient;
use crate::rate_limit::RequestLimiter;
use crate::room_service::RoomService;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub judge: Arc<dyn JudgeClient>,
    pub hub: Arc<Hub>,
    pub rooms: Arc<RoomService>,
    pub games: Arc<GameService>,
    pub auth: AuthTokens,
    pub config: Arc<ServerConfig>,
    pub api_limiter: Arc<RequestLimiter>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>, judge: Arc<dyn JudgeClient>) -> Self {
        let config = Arc::new(config);
        let hub = Arc::new(Hub::new());
        let rooms = Arc::new(RoomService::new(Arc::clone(&store), Arc::clone(&hub)));
        let games = Arc::new(GameService::new(
            Arc::clone(&store),
            Arc::clone(&judge),
            Arc::clone(&hub),
            Arc::clone(&config),
        ));
        let auth = match &config.auth.token_secret {
            Some(secret) => AuthTokens::new(secret.as_bytes().to_vec(), config.token_ttl_hours()),
            None => AuthTokens::ephemeral(config.token_ttl_hours()),
        };
        let api_limiter = Arc::new(RequestLimiter::new(
            config.limits.api_rate_limit_burst as f64,
            config.limits.api_rate_limit_per_sec,
        ));
        Self {
            store,
            judge,
            hub,
            rooms,
            games,
            auth,
            config,
            api_limiter,
            shutdown: CancellationToken::new(),
        }
    }
}
