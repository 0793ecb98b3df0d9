//! Application configuration

use std::env;

use slotwise_billing::DEFAULT_GRACE_PERIOD_DAYS;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Payment provider
    pub provider_webhook_secret: String,

    // Subscription lifecycle
    pub grace_period_days: i64,

    // Status read cache
    pub status_cache_ttl_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("{0}")]
    WeakSecret(&'static str),

    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                // A short signing key makes every tenant token forgeable
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Payment provider
            provider_webhook_secret: env::var("PROVIDER_WEBHOOK_SECRET")
                .map_err(|_| ConfigError::Missing("PROVIDER_WEBHOOK_SECRET"))?,

            // Subscription lifecycle: one global grace period, not per-plan
            grace_period_days: match env::var("GRACE_PERIOD_DAYS") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| ConfigError::Invalid("GRACE_PERIOD_DAYS"))?,
                Err(_) => DEFAULT_GRACE_PERIOD_DAYS,
            },

            // Status read cache
            status_cache_ttl_secs: env::var("STATUS_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_jwt_secret_message() {
        let err = ConfigError::WeakSecret("JWT_SECRET must be at least 32 characters");
        assert!(err.to_string().contains("32 characters"));
    }
}
