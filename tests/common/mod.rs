#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::StatusCode;
use lease_rotor::db::{ConnectionParameters, Connector, DatabaseConnection};
use lease_rotor::renewal::WatcherOptions;
use lease_rotor::{DatabaseCredentials, Lease, LeaseKind, RotorError, SecretSource};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the fake secret source answers one renewal request.
#[derive(Debug, Clone, Copy)]
pub enum Renewal {
    /// Grant the full increment.
    Extend,
    /// Grant at most this much, as a source does once a lease nears its max TTL.
    Cap(Duration),
    /// 503, retried by the watcher.
    Transient,
    /// 400, not retried.
    Terminal,
}

struct RenewScript {
    queued: VecDeque<Renewal>,
    fallback: Renewal,
}

/// In-memory secret source with scripted renewals.
pub struct FakeSecretSource {
    scripts: Mutex<HashMap<LeaseKind, RenewScript>>,
    renew_calls: Mutex<HashMap<LeaseKind, usize>>,
    logins: AtomicUsize,
    issued: AtomicUsize,
    fail_login: AtomicBool,
    login_ttl: Duration,
    credentials_ttl: Duration,
}

impl FakeSecretSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            renew_calls: Mutex::new(HashMap::new()),
            logins: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            fail_login: AtomicBool::new(false),
            login_ttl: Duration::from_secs(3600),
            credentials_ttl: Duration::from_secs(3600),
        }
    }

    /// Answer renewals of `kind` with `queued` first, then `fallback` forever.
    pub fn script(&self, kind: LeaseKind, queued: Vec<Renewal>, fallback: Renewal) {
        self.scripts.lock().unwrap().insert(
            kind,
            RenewScript {
                queued: queued.into(),
                fallback,
            },
        );
    }

    pub fn fail_logins(&self) {
        self.fail_login.store(true, Ordering::SeqCst);
    }

    pub fn renew_calls(&self, kind: LeaseKind) -> usize {
        self.renew_calls
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    fn next_renewal(&self, kind: LeaseKind) -> Renewal {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&kind) {
            Some(script) => script.queued.pop_front().unwrap_or(script.fallback),
            None => Renewal::Extend,
        }
    }
}

#[async_trait]
impl SecretSource for FakeSecretSource {
    async fn login(&self) -> Result<Lease, RotorError> {
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(RotorError::VaultStatus {
                status: StatusCode::FORBIDDEN,
                errors: vec!["invalid role or secret ID".to_string()],
            });
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Lease::new(
            LeaseKind::AuthToken,
            format!("token-{n}"),
            self.login_ttl,
            true,
        ))
    }

    async fn issue_database_credentials(
        &self,
        auth_token: &Lease,
    ) -> Result<(DatabaseCredentials, Lease), RotorError> {
        if auth_token.token().is_none() {
            return Err(RotorError::MissingAuthToken);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((
            DatabaseCredentials::new(format!("user-{n}"), format!("pw-{n}")),
            Lease::new(
                LeaseKind::DatabaseCredentials,
                format!("database/creds/app/{n}"),
                self.credentials_ttl,
                true,
            ),
        ))
    }

    async fn renew(&self, lease: &Lease, increment: Duration) -> Result<Duration, RotorError> {
        *self.renew_calls.lock().unwrap().entry(lease.kind).or_insert(0) += 1;
        match self.next_renewal(lease.kind) {
            Renewal::Extend => Ok(increment),
            Renewal::Cap(max) => Ok(increment.min(max)),
            Renewal::Transient => Err(RotorError::VaultStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                errors: vec!["Vault is sealed".to_string()],
            }),
            Renewal::Terminal => Err(RotorError::VaultStatus {
                status: StatusCode::BAD_REQUEST,
                errors: vec!["lease not found or lease is not renewable".to_string()],
            }),
        }
    }
}

/// Deterministic watcher tuning for paused-clock tests.
pub fn test_options() -> WatcherOptions {
    WatcherOptions {
        grace_ratio: 0.1,
        retry_min_delay: Duration::from_millis(500),
        retry_max_delay: Duration::from_secs(2),
        retry_max_times: 10,
        retry_jitter: false,
    }
}

pub fn auth_lease(id: &str, secs: u64, renewable: bool) -> Lease {
    Lease::new(LeaseKind::AuthToken, id, Duration::from_secs(secs), renewable)
}

pub fn db_lease(id: &str, secs: u64, renewable: bool) -> Lease {
    Lease::new(
        LeaseKind::DatabaseCredentials,
        id,
        Duration::from_secs(secs),
        renewable,
    )
}

pub fn params(connect_timeout: Duration) -> ConnectionParameters {
    ConnectionParameters {
        hostname: "db.test".to_string(),
        port: 5432,
        database: "shifts".to_string(),
        connect_timeout,
    }
}

#[derive(Default)]
struct ConnectorState {
    failing_pings: HashMap<String, usize>,
    unreachable: HashSet<String>,
    failing_close: HashSet<String>,
    opened: usize,
}

/// Connector whose reachability is decided per username.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pings by `username` fail `failures` times before succeeding.
    pub fn fail_pings(&self, username: &str, failures: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_pings
            .insert(username.to_string(), failures);
    }

    pub fn unreachable(&self, username: &str) {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(username.to_string());
    }

    pub fn fail_close(&self, username: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_close
            .insert(username.to_string());
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn open(
        &self,
        _params: &ConnectionParameters,
        credentials: &DatabaseCredentials,
    ) -> Result<FakeConnection, RotorError> {
        let mut state = self.state.lock().unwrap();
        state.opened += 1;
        let username = credentials.username.clone();
        let failures = if state.unreachable.contains(&username) {
            usize::MAX
        } else {
            state.failing_pings.get(&username).copied().unwrap_or(0)
        };
        Ok(FakeConnection {
            fail_close: state.failing_close.contains(&username),
            username,
            failures,
            pings: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }
}

pub struct FakeConnection {
    pub username: String,
    failures: usize,
    fail_close: bool,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeConnection {
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    async fn ping(&self) -> Result<(), RotorError> {
        let attempt = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(RotorError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), RotorError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(RotorError::Io(std::io::Error::other("close failed")));
        }
        Ok(())
    }
}
