use serde::Deserialize;

/// Top-level server configuration, loaded from `quizdeck.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Sled database directory. Empty means the in-memory store, which is
    /// what the test harness runs against.
    pub data_dir: String,
    pub limits: LimitsConfig,
    pub sessions: SessionsConfig,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: String::new(),
            limits: LimitsConfig::default(),
            sessions: SessionsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Infrastructure limits (buffer sizes, connection caps).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Per-connection outbound queue depth. A full queue closes the
    /// connection; the client reconnects and catches up.
    pub player_message_buffer: usize,
    /// Broadcasts replayed to a reconnecting client.
    pub replay_tail: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 2000,
            player_message_buffer: 256,
            replay_tail: 50,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
    /// Window during which a disconnected player's token may resume.
    pub reconnect_window_secs: u64,
    /// Quarantine before an ended session's join code may be reissued.
    pub ended_code_quarantine_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            idle_check_interval_secs: 60,
            reconnect_window_secs: 300,
            ended_code_quarantine_secs: 60,
        }
    }
}

/// Persistence retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub reconcile_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            retry_base_ms: 50,
            reconcile_interval_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on unusable values.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(addr = %self.listen_addr, "listen_addr is not a valid socket address");
            std::process::exit(1);
        }
        if self.limits.max_ws_connections == 0 {
            tracing::error!("limits.max_ws_connections must be > 0");
            std::process::exit(1);
        }
        if self.limits.player_message_buffer == 0 {
            tracing::error!("limits.player_message_buffer must be > 0");
            std::process::exit(1);
        }
        if self.limits.replay_tail == 0 {
            tracing::error!("limits.replay_tail must be > 0");
            std::process::exit(1);
        }
        if self.sessions.idle_timeout_secs == 0 {
            tracing::error!("sessions.idle_timeout_secs must be > 0");
            std::process::exit(1);
        }
        if self.sessions.idle_check_interval_secs == 0 {
            tracing::error!("sessions.idle_check_interval_secs must be > 0");
            std::process::exit(1);
        }
        if self.store.retry_attempts == 0 {
            tracing::error!("store.retry_attempts must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `quizdeck.toml` if it exists, then apply env var
    /// overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("quizdeck.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from quizdeck.toml");
                    cfg
                }
                Err(e) => {
                    tracing::warn!("Failed to parse quizdeck.toml: {e}, using defaults");
                    ServerConfig::default()
                }
            },
            Err(_) => {
                tracing::info!("No quizdeck.toml found, using defaults");
                ServerConfig::default()
            }
        };

        if let Ok(addr) = std::env::var("QUIZDECK_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(dir) = std::env::var("QUIZDECK_DATA_DIR")
            && !dir.is_empty()
        {
            config.data_dir = dir;
        }
        if let Ok(val) = std::env::var("QUIZDECK_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("QUIZDECK_RECONNECT_WINDOW_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.sessions.reconnect_window_secs = n;
        }

        config
    }
}
