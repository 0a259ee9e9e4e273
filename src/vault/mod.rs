//! Secret source: leases, database credentials and the Vault client.
//!
//! Layout:
//! - `mod.rs`: lease/credential types and the `SecretSource` seam
//! - `endpoints.rs`: stateless Vault HTTP calls and response shapes
//! - `client.rs`: AppRole-authenticated `VaultClient` implementing `SecretSource`

pub mod client;
pub(crate) mod endpoints;

pub use client::VaultClient;

use crate::error::RotorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const REDACTED: &str = "<redacted>";

/// What a lease protects. Revoking an auth token revokes every lease issued with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseKind {
    AuthToken,
    DatabaseCredentials,
}

impl fmt::Display for LeaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseKind::AuthToken => f.write_str("auth token"),
            LeaseKind::DatabaseCredentials => f.write_str("database credentials"),
        }
    }
}

/// A renewable grant issued by the secret source.
///
/// For [`LeaseKind::AuthToken`] the `id` is the client token itself, so it is
/// never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Lease {
    pub kind: LeaseKind,
    pub id: String,
    pub duration: Duration,
    pub renewable: bool,
    pub issued_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(kind: LeaseKind, id: impl Into<String>, duration: Duration, renewable: bool) -> Self {
        Self {
            kind,
            id: id.into(),
            duration,
            renewable,
            issued_at: Utc::now(),
        }
    }

    /// Wall-clock instant after which the grant is no longer usable.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::MAX);
        self.issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn token(&self) -> Option<&str> {
        (self.kind == LeaseKind::AuthToken).then_some(self.id.as_str())
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self.kind {
            LeaseKind::AuthToken => REDACTED,
            LeaseKind::DatabaseCredentials => self.id.as_str(),
        };
        f.debug_struct("Lease")
            .field("kind", &self.kind)
            .field("id", &id)
            .field("duration", &self.duration)
            .field("renewable", &self.renewable)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Dynamic database login bound to a [`Lease`].
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}

impl DatabaseCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Issues and renews leases.
#[async_trait]
pub trait SecretSource: Send + Sync + 'static {
    /// Authenticate and return the auth token lease.
    async fn login(&self) -> Result<Lease, RotorError>;

    /// Issue a fresh database login under the given auth token.
    async fn issue_database_credentials(
        &self,
        auth_token: &Lease,
    ) -> Result<(DatabaseCredentials, Lease), RotorError>;

    /// Extend a lease by `increment`; returns the duration now remaining,
    /// which the source may cap below the increment.
    async fn renew(&self, lease: &Lease, increment: Duration) -> Result<Duration, RotorError>;
}
