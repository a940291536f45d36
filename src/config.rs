use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

const DEFAULT_JWT_SECRET: &str = "your-jwt-secret";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings, read from the environment and an optional `.env` file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub max_connection_pooling: u32,
    pub port: u16,
    pub log_file: String,
    /// Owner of the platform clearing wallet.
    pub admin_id: Uuid,
    pub settlement_interval: Duration,
    pub stripe_secret_key: String,
    pub stripe_api_base: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| dotenv::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // mandatory fields
        let database_url = required(&lookup, "DATABASE_URL")?;
        let admin_id = parse("ADMIN_ID", required(&lookup, "ADMIN_ID")?)?;
        let stripe_secret_key = required(&lookup, "STRIPE_SECRET_KEY")?;

        // optional fields
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string());
        let max_connection_pooling = optional(&lookup, "MAX_CONNECTION_POOLING", 5)?;
        let port = optional(&lookup, "PORT", 3000)?;
        let log_file = lookup("LOG_FILE").unwrap_or_else(|| "app.log".to_string());
        let interval_secs: u64 = optional(&lookup, "SETTLEMENT_INTERVAL_SECS", 3600)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SETTLEMENT_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        let stripe_api_base =
            lookup("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string());

        Ok(Self {
            database_url,
            jwt_secret,
            max_connection_pooling,
            port,
            log_file,
            admin_id,
            settlement_interval: Duration::from_secs(interval_secs),
            stripe_secret_key,
            stripe_api_base,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => parse(name, value),
        None => Ok(default),
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}
