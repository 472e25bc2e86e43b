use serde::Deserialize;

/// Top-level server configuration, loaded from `cfduel.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub judge: JudgeConfig,
    pub game: GameTimingConfig,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            judge: JudgeConfig::default(),
            game: GameTimingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// HMAC key for identity tokens. When unset, an ephemeral key is
    /// generated at boot and tokens do not survive a restart.
    pub token_secret: Option<String>,
    pub token_ttl_hours: Option<u64>,
}

pub const DEFAULT_TOKEN_TTL_HOURS: u64 = 24 * 7;

/// External judge endpoints and pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub base_url: String,
    /// Hard deadline on every judge call, seconds.
    pub request_timeout_secs: u64,
    /// Inter-participant gap during the finalization sweep, milliseconds.
    pub sweep_pace_ms: u64,
    /// How many recent submissions to fetch per verification.
    pub submission_count: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://codeforces.com/api".to_string(),
            request_timeout_secs: 20,
            sweep_pace_ms: 1000,
            submission_count: 50,
        }
    }
}

/// Game-runtime timing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameTimingConfig {
    /// Grace period when a player's last session drops mid-game, seconds.
    pub grace_started_secs: u64,
    /// Grace period for a drop while the room is still waiting, seconds.
    pub grace_waiting_secs: u64,
    /// Interval of the `timer-sync` broadcast to active rooms, seconds.
    pub timer_sync_interval_secs: u64,
}

impl Default for GameTimingConfig {
    fn default() -> Self {
        Self {
            grace_started_secs: 60,
            grace_waiting_secs: 15,
            timer_sync_interval_secs: 5,
        }
    }
}

/// Infrastructure limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-session outbound queue bound.
    pub outbox_capacity: usize,
    /// REST rate limit: max burst tokens per IP.
    pub api_rate_limit_burst: usize,
    /// REST rate limit: token refill rate (requests per second) per IP.
    pub api_rate_limit_per_sec: f64,
    /// Per-request timeout on the REST surface, seconds.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            api_rate_limit_burst: 20,
            api_rate_limit_per_sec: 2.0,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on fatal problems.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.judge.base_url.is_empty() {
            tracing::error!("judge.base_url must not be empty");
            std::process::exit(1);
        }
        if self.judge.request_timeout_secs == 0 {
            tracing::error!("judge.request_timeout_secs must be > 0");
            std::process::exit(1);
        }
        if self.game.timer_sync_interval_secs == 0 {
            tracing::error!("game.timer_sync_interval_secs must be > 0");
            std::process::exit(1);
        }
        if self.limits.outbox_capacity == 0 {
            tracing::error!("limits.outbox_capacity must be > 0");
            std::process::exit(1);
        }
        if self.limits.api_rate_limit_per_sec <= 0.0 {
            tracing::error!("limits.api_rate_limit_per_sec must be > 0");
            std::process::exit(1);
        }

        if self.auth.token_secret.is_none() {
            tracing::warn!(
                "auth.token_secret is unset; using an ephemeral key, \
                 identity tokens will not survive a restart"
            );
        }
    }

    /// Load config from `cfduel.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("cfduel.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from cfduel.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse cfduel.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No cfduel.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("CFDUEL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(secret) = std::env::var("CFDUEL_TOKEN_SECRET")
            && !secret.is_empty()
        {
            config.auth.token_secret = Some(secret);
        }
        if let Ok(url) = std::env::var("CFDUEL_JUDGE_URL")
            && !url.is_empty()
        {
            config.judge.base_url = url;
        }
        if let Ok(val) = std::env::var("CFDUEL_SWEEP_PACE_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.judge.sweep_pace_ms = n;
        }

        config
    }

    pub fn token_ttl_hours(&self) -> u64 {
        self.auth.token_ttl_hours.unwrap_or(DEFAULT_TOKEN_TTL_HOURS)
    }
}
