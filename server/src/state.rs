use std::sync::Arc;
use std::time::Duration;

use crate::chat::{DeliveryCoordinator, IdentityDirectory, SqliteMessageStore};
use crate::config::{Config, RateLimitConfig};
use crate::db::DbPool;
use crate::ws::actor::Keepalive;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret
    pub jwt_secret: Vec<u8>,
    /// Lifetime of issued tokens in seconds
    pub token_ttl_secs: i64,
    /// Live sessions per identity
    pub directory: Arc<IdentityDirectory>,
    /// Persist-then-fan-out pipeline over `directory` and the message store
    pub coordinator: Arc<DeliveryCoordinator>,
    /// Auth endpoint rate limit, `None` disables it
    pub rate_limit: Option<RateLimitConfig>,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
    /// WebSocket ping interval and pong timeout
    pub keepalive: Keepalive,
}

impl AppState {
    /// State with default settings and no rate limiting.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>) -> Self {
        let config = Config {
            rate_limit: None,
            ..Config::default()
        };
        Self::from_config(db, jwt_secret, &config)
    }

    pub fn from_config(db: DbPool, jwt_secret: Vec<u8>, config: &Config) -> Self {
        let directory = Arc::new(IdentityDirectory::new());
        let store = Arc::new(SqliteMessageStore::new(db.clone(), config.max_message_len));
        let coordinator = Arc::new(DeliveryCoordinator::new(directory.clone(), store));

        Self {
            db,
            jwt_secret,
            token_ttl_secs: config.token_ttl_secs,
            directory,
            coordinator,
            rate_limit: config.auth_rate_limit(),
            cors_origins: config.cors_origins.clone(),
            keepalive: Keepalive {
                ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
                pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
            },
        }
    }
}
