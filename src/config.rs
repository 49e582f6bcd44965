use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Payment gateway credentials and endpoint.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    /// Secret used both for basic auth against the gateway and for verifying
    /// client-submitted payment signatures.
    #[validate(length(min = 8))]
    pub key_secret: String,
    /// Separate secret for webhook payload signatures.
    #[validate(length(min = 8))]
    pub webhook_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.gateway.test".to_string(),
            key_id: "test_key".to_string(),
            key_secret: "test_key_secret".to_string(),
            webhook_secret: "test_webhook_secret".to_string(),
        }
    }
}

/// Delivery settings and payment windows, read at checkout time.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutConfig {
    pub currency: String,
    /// Flat shipping fee below the free-shipping threshold.
    pub delivery_charge: Decimal,
    /// Orders at or above this subtotal ship free.
    pub free_shipping_threshold: Decimal,
    /// Confirmation window for gateway-backed payments.
    pub online_payment_window_mins: i64,
    /// Confirmation window for assisted (manually verified) payments.
    pub assisted_payment_window_hours: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            delivery_charge: Decimal::new(49, 0),
            free_shipping_threshold: Decimal::new(1000, 0),
            online_payment_window_mins: 15,
            assisted_payment_window_hours: 72,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Server host address.
    pub host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging).
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup.
    #[serde(default)]
    pub auto_migrate: bool,

    /// Interval of the background expiry sweep.
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_interval_secs: u64,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,
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

fn default_sweep_interval() -> u64 {
    60
}

impl AppConfig {
    /// Minimal constructor used by tests.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            expiry_sweep_interval_secs: default_sweep_interval(),
            gateway: GatewayConfig::default(),
            checkout: CheckoutConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    if let Ok(url) = env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }

    let config: AppConfig = builder.build()?.try_deserialize()?;

    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    Ok(config)
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={level},tower_http=info");
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
