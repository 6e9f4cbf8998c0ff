use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_FREE_SHIPPING_THRESHOLD: f64 = 100.0;
const DEFAULT_STANDARD_DELIVERY_FEE: f64 = 5.0;
const DEFAULT_PAYMENT_API_BASE: &str = "https://api.stripe.com/v1";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (1024-65535)
    #[serde(default = "default_port")]
    #[validate(range(min = 1024, max = 65535))]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to create the database schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// ISO currency code used for payment intents
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Orders with a subtotal above this amount ship free
    #[serde(default = "default_free_shipping_threshold")]
    #[validate(range(min = 0.0))]
    pub free_shipping_threshold: f64,

    /// Flat delivery fee applied below the free-shipping threshold
    #[serde(default = "default_standard_delivery_fee")]
    #[validate(range(min = 0.0))]
    pub standard_delivery_fee: f64,

    /// Payment provider REST API base URL
    #[serde(default = "default_payment_api_base")]
    pub payment_api_base: String,

    /// Payment provider secret API key
    #[serde(default)]
    pub payment_secret_key: String,

    /// Shared secret for verifying inbound payment webhooks
    #[serde(default)]
    pub payment_webhook_secret: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
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
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_free_shipping_threshold() -> f64 {
    DEFAULT_FREE_SHIPPING_THRESHOLD
}
fn default_standard_delivery_fee() -> f64 {
    DEFAULT_STANDARD_DELIVERY_FEE
}
fn default_payment_api_base() -> String {
    DEFAULT_PAYMENT_API_BASE.to_string()
}

impl AppConfig {
    /// Constructs a configuration directly, filling every optional field
    /// with its default. Primarily used by tests.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            currency: default_currency(),
            free_shipping_threshold: default_free_shipping_threshold(),
            standard_delivery_fee: default_standard_delivery_fee(),
            payment_api_base: default_payment_api_base(),
            payment_secret_key: String::new(),
            payment_webhook_secret: String::new(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Free-shipping threshold as an exact decimal amount.
    pub fn free_shipping_threshold_amount(&self) -> Decimal {
        Decimal::from_f64_retain(self.free_shipping_threshold).unwrap_or(Decimal::ZERO)
    }

    /// Standard delivery fee as an exact decimal amount.
    pub fn standard_delivery_fee_amount(&self) -> Decimal {
        Decimal::from_f64_retain(self.standard_delivery_fee).unwrap_or(Decimal::ZERO)
    }
}

/// Loads configuration from `config/default`, `config/{APP_ENV}` and
/// `APP__`-prefixed environment variables, in that order of precedence.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let settings = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;
    Ok(cfg)
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter =
        EnvFilter::try_new(filter_directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
