use crate::db::{ConnectionParameters, Connector, DatabaseConnection};
use crate::error::RotorError;
use crate::vault::DatabaseCredentials;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(500);

/// Owner of the single active database connection.
///
/// `reconnect` builds and verifies a replacement off to the side and only
/// takes the lock for the swap itself, so readers keep using the previous
/// connection until the new one is known to answer.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    params: ConnectionParameters,
    ping_interval: Duration,
    active: Mutex<Option<Arc<C::Connection>>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// A manager with no connection yet; call [`reconnect`](Self::reconnect) before use.
    pub fn new(connector: C, params: ConnectionParameters) -> Self {
        Self {
            connector,
            params,
            ping_interval: DEFAULT_PING_INTERVAL,
            active: Mutex::new(None),
        }
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Build a manager and establish its first connection.
    pub async fn connect(
        connector: C,
        params: ConnectionParameters,
        ping_interval: Duration,
        credentials: &DatabaseCredentials,
        cancel: &CancellationToken,
    ) -> Result<Self, RotorError> {
        let manager = Self::new(connector, params).with_ping_interval(ping_interval);
        manager.reconnect(cancel, credentials).await?;
        Ok(manager)
    }

    /// Open a connection with `credentials`, wait until it answers a ping,
    /// then make it the active one and close its predecessor.
    ///
    /// On error the previously active connection is left untouched.
    pub async fn reconnect(
        &self,
        cancel: &CancellationToken,
        credentials: &DatabaseCredentials,
    ) -> Result<(), RotorError> {
        info!(
            database = %self.params.database,
            host = %self.params.hostname,
            port = self.params.port,
            "connecting to database"
        );

        let connection = self.connector.open(&self.params, credentials).await?;

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RotorError::Cancelled),
            res = self.wait_until_reachable(&connection) => res,
        };
        if let Err(e) = ready {
            if let Err(close_err) = connection.close().await {
                debug!(error = %close_err, "closing unreachable connection failed");
            }
            return Err(e);
        }

        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(connection));

        if let Some(previous) = previous
            && let Err(e) = previous.close().await
        {
            // The new connection is already serving; the old one may leak.
            warn!(error = %e, "failed to close replaced database connection");
        }

        info!(database = %self.params.database, "connected to database");
        Ok(())
    }

    async fn wait_until_reachable(&self, connection: &C::Connection) -> Result<(), RotorError> {
        let deadline = Instant::now() + self.params.connect_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last_error = match tokio::time::timeout_at(deadline, connection.ping()).await {
                Ok(Ok(())) => {
                    debug!(attempt, "database answered ping");
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "ping did not complete".to_string(),
            };
            debug!(attempt, error = %last_error, "database not reachable yet");

            if Instant::now() + self.ping_interval >= deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(RotorError::ConnectDeadline {
                    timeout: self.params.connect_timeout,
                    last_error,
                });
            }
            sleep(self.ping_interval).await;
        }
    }

    /// The connection new work should run on. Do not hold on to it past the
    /// current unit of work: a later `reconnect` closes it.
    pub fn active_connection(&self) -> Result<Arc<C::Connection>, RotorError> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RotorError::ConnectionClosed)
    }

    /// Close the active connection. Later calls do nothing.
    pub async fn close(&self) -> Result<(), RotorError> {
        let current = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match current {
            Some(connection) => {
                info!(database = %self.params.database, "closing database connection");
                connection.close().await
            }
            None => Ok(()),
        }
    }
}
