use crate::db::{ConnectionManager, Connector};
use crate::error::RotorError;
use crate::renewal::result::RenewResult;
use crate::renewal::watcher::{LeaseWatcher, WatcherOptions};
use crate::vault::{DatabaseCredentials, Lease, SecretSource};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of [`RenewalCoordinator::run_cycle`]: the flags plus whatever error
/// ended the cycle, if any.
#[derive(Debug)]
pub struct CycleOutcome {
    pub result: RenewResult,
    pub error: Option<RotorError>,
}

impl CycleOutcome {
    fn new(result: RenewResult, error: Option<RotorError>) -> Self {
        Self { result, error }
    }
}

/// States of the credential rotation loop driven by [`RenewalCoordinator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Running,
    ReAuthenticating,
    Reconnecting,
    Stopped,
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationState::Running => "running",
            RotationState::ReAuthenticating => "re-authenticating",
            RotationState::Reconnecting => "reconnecting",
            RotationState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Keeps the auth token and the database credential lease alive, replacing
/// them (and the database connection) when they can no longer be renewed.
pub struct RenewalCoordinator {
    source: Arc<dyn SecretSource>,
    options: WatcherOptions,
}

impl RenewalCoordinator {
    pub fn new(source: Arc<dyn SecretSource>, options: WatcherOptions) -> Self {
        Self { source, options }
    }

    /// Watch both leases until one of them can no longer be renewed or
    /// `cancel` fires.
    ///
    /// Leases issued under the auth token die with it, so an expiring auth
    /// token always reports expiring database credentials too.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
        auth_token: &Lease,
        db_credentials_lease: &Lease,
    ) -> CycleOutcome {
        info!(
            auth_token_expires_at = %auth_token.expires_at(),
            db_credentials_expire_at = %db_credentials_lease.expires_at(),
            "renew cycle: begin"
        );
        let outcome = self
            .supervise(cancel, auth_token, db_credentials_lease)
            .await;
        info!(result = %outcome.result, "renew cycle: end");
        outcome
    }

    async fn supervise(
        &self,
        cancel: &CancellationToken,
        auth_token: &Lease,
        db_credentials_lease: &Lease,
    ) -> CycleOutcome {
        let mut auth_watcher =
            match LeaseWatcher::new(self.source.clone(), auth_token.clone(), self.options.clone()) {
                Ok(watcher) => watcher,
                Err(e) => return CycleOutcome::new(RenewResult::ERROR, Some(e)),
            };
        let mut db_watcher = match LeaseWatcher::new(
            self.source.clone(),
            db_credentials_lease.clone(),
            self.options.clone(),
        ) {
            Ok(watcher) => watcher,
            Err(e) => return CycleOutcome::new(RenewResult::ERROR, Some(e)),
        };

        auth_watcher.start();
        db_watcher.start();

        let outcome = {
            let (auth_renewals, auth_done) = auth_watcher.events();
            let (db_renewals, db_done) = db_watcher.events();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        break CycleOutcome::new(RenewResult::EXIT_REQUESTED, None);
                    }
                    err = &mut *auth_done => {
                        break CycleOutcome::new(
                            RenewResult::AUTH_TOKEN_EXPIRING | RenewResult::DB_CREDENTIALS_EXPIRING,
                            err,
                        );
                    }
                    err = &mut *db_done => {
                        break CycleOutcome::new(RenewResult::DB_CREDENTIALS_EXPIRING, err);
                    }
                    Some(event) = auth_renewals.next() => {
                        info!(
                            remaining_secs = event.remaining.as_secs(),
                            "auth token: successfully renewed"
                        );
                    }
                    Some(event) = db_renewals.next() => {
                        info!(
                            remaining_secs = event.remaining.as_secs(),
                            "database credentials: successfully renewed"
                        );
                    }
                }
            }
        };

        auth_watcher.stop().await;
        db_watcher.stop().await;
        outcome
    }

    /// Rotate credentials until `cancel` fires.
    ///
    /// Returns `Ok(())` once cancelled. Any error is fatal: the process can
    /// no longer vouch for its database connection.
    pub async fn run<C: Connector>(
        &self,
        cancel: CancellationToken,
        auth_token: Lease,
        db_credentials_lease: Lease,
        connections: &ConnectionManager<C>,
    ) -> Result<(), RotorError> {
        info!("renew / recreate secrets loop: begin");
        let res = self
            .rotate(&cancel, auth_token, db_credentials_lease, connections)
            .await;
        match &res {
            Ok(()) => info!("renew / recreate secrets loop: end"),
            Err(e) => error!(error = %e, "renew / recreate secrets loop: fatal error"),
        }
        res
    }

    async fn rotate<C: Connector>(
        &self,
        cancel: &CancellationToken,
        mut auth_token: Lease,
        mut db_credentials_lease: Lease,
        connections: &ConnectionManager<C>,
    ) -> Result<(), RotorError> {
        let mut state = RotationState::Running;
        let mut fresh: Option<(DatabaseCredentials, Lease)> = None;

        loop {
            let next = match state {
                RotationState::Running => {
                    if cancel.is_cancelled() {
                        RotationState::Stopped
                    } else {
                        let outcome = self
                            .run_cycle(cancel, &auth_token, &db_credentials_lease)
                            .await;
                        let next = next_state(outcome)?;
                        if let Some(notice) = expiry_notice(next) {
                            info!("{notice}");
                        }
                        next
                    }
                }
                RotationState::ReAuthenticating => {
                    auth_token = self
                        .source
                        .login()
                        .await
                        .map_err(|e| RotorError::ReAuthentication(Box::new(e)))?;
                    let issued = self
                        .source
                        .issue_database_credentials(&auth_token)
                        .await
                        .map_err(|e| RotorError::ReAuthentication(Box::new(e)))?;
                    fresh = Some(issued);
                    RotationState::Reconnecting
                }
                RotationState::Reconnecting => {
                    debug!(
                        reissue = fresh.is_none(),
                        "reconnecting with new database credentials"
                    );
                    let (credentials, lease) = match fresh.take() {
                        Some(issued) => issued,
                        None => self
                            .source
                            .issue_database_credentials(&auth_token)
                            .await
                            .map_err(|e| RotorError::Reconnect(Box::new(e)))?,
                    };
                    match connections.reconnect(cancel, &credentials).await {
                        Ok(()) => {
                            db_credentials_lease = lease;
                            RotationState::Running
                        }
                        Err(RotorError::Cancelled) => RotationState::Stopped,
                        Err(e) => return Err(RotorError::Reconnect(Box::new(e))),
                    }
                }
                RotationState::Stopped => return Ok(()),
            };

            if next != state {
                debug!(from = %state, to = %next, "rotation state change");
            }
            state = next;
        }
    }
}

fn next_state(outcome: CycleOutcome) -> Result<RotationState, RotorError> {
    let CycleOutcome { result, error } = outcome;

    if result.error {
        let e = error.unwrap_or(RotorError::CycleFailed);
        return Err(RotorError::Watcher(Box::new(e)));
    }
    if result.exit_requested {
        return Ok(RotationState::Stopped);
    }
    if let Some(e) = &error {
        // Expected path: the lease gets replaced below.
        warn!(error = %e, "lease renewal ended with an error");
    }
    if result.auth_token_expiring {
        return Ok(RotationState::ReAuthenticating);
    }
    if result.db_credentials_expiring {
        return Ok(RotationState::Reconnecting);
    }
    Ok(RotationState::Running)
}

/// Log line for a state entered because a lease ran out.
fn expiry_notice(next: RotationState) -> Option<&'static str> {
    match next {
        RotationState::ReAuthenticating => {
            Some("auth token: can no longer be renewed; will log in again")
        }
        RotationState::Reconnecting => Some(
            "database credentials: can no longer be renewed; will fetch new credentials & reconnect",
        ),
        RotationState::Running | RotationState::Stopped => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::LeaseKind;

    #[test]
    fn auth_expiry_takes_precedence_over_db_expiry() {
        let outcome = CycleOutcome::new(
            RenewResult::AUTH_TOKEN_EXPIRING | RenewResult::DB_CREDENTIALS_EXPIRING,
            None,
        );
        assert_eq!(next_state(outcome).ok(), Some(RotationState::ReAuthenticating));

        let db_only = CycleOutcome::new(
            RenewResult::DB_CREDENTIALS_EXPIRING,
            Some(RotorError::LeaseExpired {
                kind: LeaseKind::DatabaseCredentials,
            }),
        );
        assert_eq!(next_state(db_only).ok(), Some(RotationState::Reconnecting));
    }

    #[test]
    fn error_flag_is_fatal() {
        let outcome = CycleOutcome::new(
            RenewResult::ERROR,
            Some(RotorError::InvalidLease {
                kind: LeaseKind::AuthToken,
                reason: "lease has no id".to_string(),
            }),
        );
        assert!(matches!(next_state(outcome), Err(RotorError::Watcher(_))));

        let unexplained = CycleOutcome::new(RenewResult::ERROR, None);
        match next_state(unexplained) {
            Err(RotorError::Watcher(inner)) => {
                assert!(matches!(*inner, RotorError::CycleFailed));
            }
            other => panic!("expected a watcher failure, got {other:?}"),
        }

        let exit = CycleOutcome::new(RenewResult::EXIT_REQUESTED, None);
        assert_eq!(next_state(exit).ok(), Some(RotationState::Stopped));
    }

    #[test]
    fn only_lease_expiry_transitions_carry_a_notice() {
        let auth = expiry_notice(RotationState::ReAuthenticating).expect("auth notice");
        assert!(auth.starts_with("auth token"));
        let db = expiry_notice(RotationState::Reconnecting).expect("db notice");
        assert!(db.starts_with("database credentials"));
        assert_eq!(expiry_notice(RotationState::Running), None);
        assert_eq!(expiry_notice(RotationState::Stopped), None);
    }
}
