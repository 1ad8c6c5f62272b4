use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "SGD";
const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;
const DEFAULT_UNPAID_ORDER_TIMEOUT_MINUTES: i64 = 60;
const DEFAULT_PROOF_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_PROOF_STORAGE_DIR: &str = "./data/proofs";

/// Application configuration with validation.
///
/// Loaded from `config/default.toml`, an environment-specific overlay
/// (`config/<environment>.toml`), and `APP__`-prefixed environment
/// variables, in that order of precedence.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment ("development", "test", "production")
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level filter (e.g. "info", "kitchencloud_api=debug,info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Currency code stamped on orders
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Minutes before an unconsumed checkout session expires
    #[serde(default = "default_session_ttl_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub checkout_session_ttl_minutes: i64,

    /// Minutes before an unpaid PENDING order becomes eligible for the
    /// cancellation sweep. Policy knob only; the sweep itself is an
    /// explicit admin operation.
    #[serde(default = "default_unpaid_order_timeout_minutes")]
    #[validate(range(min = 5))]
    pub unpaid_order_timeout_minutes: i64,

    /// Payment proof upload size ceiling in bytes
    #[serde(default = "default_proof_max_bytes")]
    pub payment_proof_max_bytes: u64,

    /// Directory the local proof storage provider writes under
    #[serde(default = "default_proof_storage_dir")]
    pub payment_proof_storage_dir: String,

    /// Geocoding search endpoint (OneMap-compatible); None disables
    /// distance-based delivery quoting
    #[serde(default)]
    pub geocoding_base_url: Option<String>,

    /// Transactional email provider endpoint + key; None falls back to a
    /// log-only sender
    #[serde(default)]
    pub email_api_url: Option<String>,
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// WhatsApp message provider endpoint + key; None falls back to a
    /// log-only sender
    #[serde(default)]
    pub whatsapp_api_url: Option<String>,
    #[serde(default)]
    pub whatsapp_api_key: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_session_ttl_minutes() -> i64 {
    DEFAULT_SESSION_TTL_MINUTES
}
fn default_unpaid_order_timeout_minutes() -> i64 {
    DEFAULT_UNPAID_ORDER_TIMEOUT_MINUTES
}
fn default_proof_max_bytes() -> u64 {
    DEFAULT_PROOF_MAX_BYTES
}
fn default_proof_storage_dir() -> String {
    DEFAULT_PROOF_STORAGE_DIR.to_string()
}

impl AppConfig {
    /// Construct a minimal configuration programmatically (tests, tools).
    pub fn new(
        database_url: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            currency: default_currency(),
            checkout_session_ttl_minutes: default_session_ttl_minutes(),
            unpaid_order_timeout_minutes: default_unpaid_order_timeout_minutes(),
            payment_proof_max_bytes: default_proof_max_bytes(),
            payment_proof_storage_dir: default_proof_storage_dir(),
            geocoding_base_url: None,
            email_api_url: None,
            email_api_key: None,
            whatsapp_api_url: None,
            whatsapp_api_key: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.checkout_session_ttl_minutes)
    }

    pub fn unpaid_order_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.unpaid_order_timeout_minutes)
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_secs)
    }

    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.db_idle_timeout_secs)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    /// Permissive CORS is acceptable in development or when explicitly
    /// opted into.
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }
}

/// Load configuration from files and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default");
    builder = builder.add_source(File::from(default_path).required(false));

    let env_path = Path::new(CONFIG_DIR).join(&environment);
    builder = builder.add_source(File::from(env_path).required(false));

    // APP__DATABASE_URL=... style overrides
    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initialise the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
