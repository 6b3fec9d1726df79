use clap::parser::ValueSource;
use clap::{CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Parley direct-messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "parley-server", version, about = "Parley direct-messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PARLEY_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PARLEY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PARLEY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "PARLEY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// JWT signing secret. When unset, a random key is kept in data_dir/jwt_secret
    #[arg(long, env = "PARLEY_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Lifetime of issued tokens in seconds
    #[arg(long, env = "PARLEY_TOKEN_TTL_SECS", default_value = "3600")]
    pub token_ttl_secs: i64,

    /// Maximum message length in characters
    #[arg(long, env = "PARLEY_MAX_MESSAGE_LEN", default_value = "4096")]
    pub max_message_len: usize,

    /// Seconds between WebSocket keepalive pings
    #[arg(long, env = "PARLEY_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the connection
    #[arg(long, env = "PARLEY_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,

    /// Allowed CORS origins, comma-separated. "*" allows any origin
    #[arg(long, env = "PARLEY_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Auth endpoint rate limiting (loaded from [rate_limit] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Per-IP rate limit on the unauthenticated auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is applied (default: true)
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Seconds to replenish one request (default: 12, i.e. 5 per minute)
    #[serde(default = "default_replenish_secs")]
    pub replenish_secs: u64,

    /// Burst size (default: 5)
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replenish_secs: 12,
            burst_size: 5,
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_replenish_secs() -> u64 {
    12
}

fn default_burst_size() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./parley.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            token_ttl_secs: 3600,
            max_message_len: 4096,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            cors_origins: vec!["*".to_string()],
            rate_limit: Some(RateLimitConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let matches = Config::command().get_matches();
        let cli = Config::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

        Self::layered(&cli, |id| {
            matches
                .value_source(id)
                .is_some_and(|source| source != ValueSource::DefaultValue)
        })
    }

    /// Merge defaults, the TOML file and PARLEY_* env vars, then overlay the
    /// CLI values for which `explicit` returns true. clap fills unset flags
    /// with their defaults, so overlaying every CLI value would mask the file.
    fn layered(cli: &Config, explicit: impl Fn(&str) -> bool) -> Result<Self, figment::Error> {
        let cli_values = serde_json::to_value(cli).map_err(|e| e.to_string())?;

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("PARLEY_"));

        if let serde_json::Value::Object(fields) = cli_values {
            for (key, value) in fields {
                if !value.is_null() && explicit(&key) {
                    figment = figment.merge(Serialized::default(&key, value));
                }
            }
        }

        figment.extract()
    }

    /// Effective rate limit, `None` when disabled.
    pub fn auth_rate_limit(&self) -> Option<RateLimitConfig> {
        self.rate_limit.clone().filter(|limit| limit.enabled)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# JWT signing secret. Leave unset to use a generated key in data_dir
# jwt_secret = ""

# Token lifetime in seconds (default: 3600)
# token_ttl_secs = 3600

# Maximum message length in characters (default: 4096)
# max_message_len = 4096

# WebSocket keepalive: ping interval and pong timeout in seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Allowed CORS origins ("*" allows any)
# cors_origins = ["*"]

# ---- Auth Rate Limiting ----
# [rate_limit]
# enabled = true
# replenish_secs = 12   # one request every 12 seconds
# burst_size = 5
"#
    .to_string()
}
