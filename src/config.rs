use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgSslMode;
use std::fmt;
use std::time::Duration;

use crate::db::{ConnectionParameters, PostgresConnector};
use crate::error::RotorError;
use crate::renewal::WatcherOptions;

/// Prefix of the environment variables read by [`Config::load`],
/// e.g. `ROTOR_VAULT__ROLE_ID` or `ROTOR_DATABASE__HOST`.
pub const ENV_PREFIX: &str = "ROTOR_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub vault: VaultConfig,
    pub database: DatabaseConfig,
    pub renewal: RenewalConfig,
}

impl Config {
    /// Defaults, overridden by `ROTOR_<SECTION>__<KEY>` environment variables.
    pub fn load() -> Result<Self, RotorError> {
        Self::figment().extract().map_err(RotorError::from)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub loglevel: String,
    pub listen_addr: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub address: String,
    pub approle_mount: String,
    pub role_id: String,
    pub secret_id: String,
    pub database_credentials_path: String,
    pub request_timeout_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            approle_mount: "approle".to_string(),
            role_id: String::new(),
            secret_id: String::new(),
            database_credentials_path: "database/creds/app".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("approle_mount", &self.approle_mount)
            .field("role_id", &self.role_id)
            .field("secret_id", &"<redacted>")
            .field("database_credentials_path", &self.database_credentials_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub connect_timeout_secs: u64,
    pub ping_interval_ms: u64,
    pub max_connections: u32,
    /// One of sqlx's `PgSslMode` names, e.g. `prefer`, `require` or `verify-full`.
    pub ssl_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            name: "postgres".to_string(),
            connect_timeout_secs: 10,
            ping_interval_ms: 500,
            max_connections: 10,
            ssl_mode: "prefer".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters {
            hostname: self.host.clone(),
            port: self.port,
            database: self.name.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn connector(&self) -> Result<PostgresConnector, RotorError> {
        let ssl_mode = self
            .ssl_mode
            .parse::<PgSslMode>()
            .map_err(|_| RotorError::InvalidConfig(format!("unknown ssl_mode `{}`", self.ssl_mode)))?;
        Ok(PostgresConnector::new(self.max_connections).with_ssl_mode(ssl_mode))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Fraction of a lease's original duration treated as "too late to renew".
    pub grace_ratio: f64,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_max_times: usize,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        let options = WatcherOptions::default();
        Self {
            grace_ratio: options.grace_ratio,
            retry_min_delay_ms: options.retry_min_delay.as_millis() as u64,
            retry_max_delay_ms: options.retry_max_delay.as_millis() as u64,
            retry_max_times: options.retry_max_times,
        }
    }
}

impl RenewalConfig {
    pub fn watcher_options(&self) -> Result<WatcherOptions, RotorError> {
        if !self.grace_ratio.is_finite() {
            return Err(RotorError::InvalidConfig(format!(
                "renewal.grace_ratio must be a finite number, got {}",
                self.grace_ratio
            )));
        }
        Ok(WatcherOptions {
            grace_ratio: self.grace_ratio.clamp(0.0, 0.9),
            retry_min_delay: Duration::from_millis(self.retry_min_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms.max(self.retry_min_delay_ms)),
            retry_max_times: self.retry_max_times,
            retry_jitter: true,
        })
    }
}
