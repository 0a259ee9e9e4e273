//! Database module: the swappable connection and its drivers.
//!
//! Layout:
//! - `mod.rs`: static connection parameters and the driver seams
//! - `manager.rs`: `ConnectionManager`, holder of the single active connection
//! - `postgres.rs`: sqlx-backed PostgreSQL driver

pub mod manager;
pub mod postgres;

pub use manager::ConnectionManager;
pub use postgres::{PostgresConnection, PostgresConnector};

use crate::error::RotorError;
use crate::vault::DatabaseCredentials;
use async_trait::async_trait;
use std::time::Duration;

/// Where and how long to try to connect. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub hostname: String,
    pub port: u16,
    pub database: String,
    pub connect_timeout: Duration,
}

/// Opens database handles for a credential pair.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: DatabaseConnection;

    /// Build a handle. Must not wait for the server to become reachable;
    /// [`ConnectionManager::reconnect`] pings it afterwards.
    async fn open(
        &self,
        params: &ConnectionParameters,
        credentials: &DatabaseCredentials,
    ) -> Result<Self::Connection, RotorError>;
}

#[async_trait]
pub trait DatabaseConnection: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), RotorError>;

    /// Release the handle. Calling it more than once is harmless.
    async fn close(&self) -> Result<(), RotorError>;
}
