use crate::db::{ConnectionParameters, Connector, DatabaseConnection};
use crate::error::RotorError;
use crate::vault::DatabaseCredentials;
use async_trait::async_trait;
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

/// Opens lazily connected sqlx pools.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    max_connections: u32,
    ssl_mode: PgSslMode,
}

impl PostgresConnector {
    pub fn new(max_connections: u32) -> Self {
        Self {
            max_connections: max_connections.max(1),
            ssl_mode: PgSslMode::Prefer,
        }
    }

    pub fn with_ssl_mode(mut self, ssl_mode: PgSslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    fn connect_options(
        &self,
        params: &ConnectionParameters,
        credentials: &DatabaseCredentials,
    ) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&params.hostname)
            .port(params.port)
            .database(&params.database)
            .username(&credentials.username)
            .password(&credentials.password)
            .ssl_mode(self.ssl_mode)
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Connection = PostgresConnection;

    async fn open(
        &self,
        params: &ConnectionParameters,
        credentials: &DatabaseCredentials,
    ) -> Result<PostgresConnection, RotorError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(params.connect_timeout)
            .connect_lazy_with(self.connect_options(params, credentials));
        Ok(PostgresConnection { pool })
    }
}

/// A pool bound to one credential pair.
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// The pool for running queries. Do not keep it beyond the current unit of
    /// work; it is closed once the credentials behind it are rotated.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn ping(&self) -> Result<(), RotorError> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RotorError> {
        self.pool.close().await;
        Ok(())
    }
}
