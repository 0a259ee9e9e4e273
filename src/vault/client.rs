use super::endpoints::VaultEndpoints;
use crate::config::VaultConfig;
use crate::error::RotorError;
use crate::vault::{DatabaseCredentials, Lease, LeaseKind, SecretSource};
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// AppRole-authenticated Vault client.
///
/// Remembers the token of the last successful login; secret lease renewals
/// are made with it.
pub struct VaultClient {
    http: reqwest::Client,
    base: Url,
    approle_mount: String,
    role_id: String,
    secret_id: String,
    database_credentials_path: String,
    token: RwLock<Option<String>>,
}

impl VaultClient {
    pub fn new(cfg: &VaultConfig) -> Result<Self, RotorError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lease-rotor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()?;

        // `Url::join` drops the last path segment unless the base ends with '/'.
        let mut base = Url::parse(&cfg.address)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http,
            base,
            approle_mount: cfg.approle_mount.clone(),
            role_id: cfg.role_id.clone(),
            secret_id: cfg.secret_id.clone(),
            database_credentials_path: cfg.database_credentials_path.clone(),
            token: RwLock::new(None),
        })
    }

    fn current_token(&self) -> Result<String, RotorError> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(RotorError::MissingAuthToken)
    }

    fn remember_token(&self, token: &str) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_string());
    }
}

#[async_trait]
impl SecretSource for VaultClient {
    async fn login(&self) -> Result<Lease, RotorError> {
        let auth = VaultEndpoints::approle_login(
            &self.http,
            &self.base,
            &self.approle_mount,
            &self.role_id,
            &self.secret_id,
        )
        .await?;
        if auth.client_token.is_empty() {
            return Err(RotorError::MalformedVaultResponse("auth.client_token"));
        }
        self.remember_token(&auth.client_token);
        info!(
            ttl_secs = auth.lease_duration,
            renewable = auth.renewable,
            "vault: approle login succeeded"
        );
        Ok(Lease::new(
            LeaseKind::AuthToken,
            auth.client_token,
            Duration::from_secs(auth.lease_duration),
            auth.renewable,
        ))
    }

    async fn issue_database_credentials(
        &self,
        auth_token: &Lease,
    ) -> Result<(DatabaseCredentials, Lease), RotorError> {
        let token = auth_token.token().ok_or(RotorError::MissingAuthToken)?;
        let secret = VaultEndpoints::read_database_credentials(
            &self.http,
            &self.base,
            token,
            &self.database_credentials_path,
        )
        .await?;
        let credentials = secret
            .data
            .ok_or(RotorError::MalformedVaultResponse("data"))?;
        if secret.lease_id.is_empty() {
            return Err(RotorError::MalformedVaultResponse("lease_id"));
        }
        info!(
            lease_id = %secret.lease_id,
            ttl_secs = secret.lease_duration,
            renewable = secret.renewable,
            "vault: issued database credentials"
        );
        let lease = Lease::new(
            LeaseKind::DatabaseCredentials,
            secret.lease_id,
            Duration::from_secs(secret.lease_duration),
            secret.renewable,
        );
        Ok((credentials, lease))
    }

    async fn renew(&self, lease: &Lease, increment: Duration) -> Result<Duration, RotorError> {
        let increment_secs = increment.as_secs().max(1);
        let ttl_secs = match lease.kind {
            LeaseKind::AuthToken => {
                VaultEndpoints::renew_self(&self.http, &self.base, &lease.id, increment_secs)
                    .await?
            }
            LeaseKind::DatabaseCredentials => {
                let token = self.current_token()?;
                VaultEndpoints::renew_lease(
                    &self.http,
                    &self.base,
                    &token,
                    &lease.id,
                    increment_secs,
                )
                .await?
            }
        };
        debug!(kind = %lease.kind, ttl_secs, "vault: lease renewed");
        Ok(Duration::from_secs(ttl_secs))
    }
}
