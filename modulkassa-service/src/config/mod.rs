use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;

use crate::services::classifier::ClassifierConfig;

/// Process-wide configuration, loaded from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub lock_dir: PathBuf,
    pub http_timeout: Duration,
    pub log_level: String,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let db_url =
            env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()?;
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let lock_dir = env::var("MODULKASSA_LOCK_DIR")
            .unwrap_or_else(|_| "/tmp/.crmodulkassa".to_string());

        let http_timeout_secs: u64 = env::var("MODULKASSA_HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            lock_dir: PathBuf::from(lock_dir),
            http_timeout: Duration::from_secs(http_timeout_secs),
            log_level,
            service_name: "modulkassa-service".to_string(),
        })
    }
}

/// Per-register settings loaded from billing storage.
#[derive(Clone, Debug)]
pub struct RegisterConfig {
    pub username: String,
    pub password: Secret<String>,
    pub url: String,
    pub retail_point_id: String,
    /// Map unsupported/NULL tax rates to the no-tax tag instead of failing.
    pub convert_invalid_rate_to_none_rate: bool,
    /// Operator-level payment-method override (external numeric code).
    pub default_payment_method: Option<i32>,
    /// Operator-level payment-object override (external numeric code).
    pub default_payment_object: Option<i32>,
}

impl RegisterConfig {
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            convert_invalid_rate_to_none_rate: self.convert_invalid_rate_to_none_rate,
            default_payment_method: self.default_payment_method,
            default_payment_object: self.default_payment_object,
        }
    }

    /// Lock key for this register's credential set.
    pub fn lock_key(&self) -> String {
        cashier_core::lock::lock_key(&self.username, &self.url, &self.retail_point_id)
    }
}
