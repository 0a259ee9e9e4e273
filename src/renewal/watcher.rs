use crate::error::{IsRetryable, RotorError};
use crate::vault::{Lease, LeaseKind, SecretSource};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning for [`LeaseWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Share of the lease's original duration below which renewing is
    /// pointless and the lease should be replaced instead.
    pub grace_ratio: f64,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_max_times: usize,
    pub retry_jitter: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            grace_ratio: 0.1,
            retry_min_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            retry_max_times: 5,
            retry_jitter: true,
        }
    }
}

impl WatcherOptions {
    fn grace_for(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.grace_ratio.clamp(0.0, 0.9))
    }

    fn retry_policy(&self) -> ExponentialBuilder {
        let policy = ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.retry_max_delay)
            .with_max_times(self.retry_max_times);
        if self.retry_jitter {
            policy.with_jitter()
        } else {
            policy
        }
    }
}

/// Longest lease the watcher tracks. Longer grants are treated as this long.
const MAX_TRACKED_LEASE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A successful renewal.
#[derive(Debug, Clone)]
pub struct RenewalEvent {
    pub kind: LeaseKind,
    pub remaining: Duration,
    pub renewed_at: DateTime<Utc>,
}

pub type RenewalEvents = UnboundedReceiverStream<RenewalEvent>;

/// Resolves once, when the watched lease can no longer be kept alive.
///
/// The output is `None` when the lease simply reached the end of its
/// renewable life, or the error that stopped renewal.
pub struct DoneEvent {
    kind: LeaseKind,
    rx: oneshot::Receiver<Option<RotorError>>,
}

impl Future for DoneEvent {
    type Output = Option<RotorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let kind = self.kind;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Some(RotorError::WatcherStopped(kind))))
    }
}

/// Keeps one lease alive in a background task.
pub struct LeaseWatcher {
    kind: LeaseKind,
    pending: Option<PendingRenewal>,
    renewals: RenewalEvents,
    done: DoneEvent,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct PendingRenewal {
    source: Arc<dyn SecretSource>,
    lease: Lease,
    options: WatcherOptions,
    renew_tx: mpsc::UnboundedSender<RenewalEvent>,
    done_tx: oneshot::Sender<Option<RotorError>>,
}

impl LeaseWatcher {
    pub fn new(
        source: Arc<dyn SecretSource>,
        lease: Lease,
        options: WatcherOptions,
    ) -> Result<Self, RotorError> {
        if lease.id.is_empty() {
            return Err(RotorError::InvalidLease {
                kind: lease.kind,
                reason: "lease has no id".to_string(),
            });
        }
        if !options.grace_ratio.is_finite() {
            return Err(RotorError::InvalidConfig(format!(
                "grace ratio must be a finite number, got {}",
                options.grace_ratio
            )));
        }
        if lease.renewable && lease.duration.is_zero() {
            return Err(RotorError::InvalidLease {
                kind: lease.kind,
                reason: "renewable lease has no duration".to_string(),
            });
        }

        let kind = lease.kind;
        let (renew_tx, renew_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        Ok(Self {
            kind,
            pending: Some(PendingRenewal {
                source,
                lease,
                options,
                renew_tx,
                done_tx,
            }),
            renewals: UnboundedReceiverStream::new(renew_rx),
            done: DoneEvent { kind, rx: done_rx },
            cancel: CancellationToken::new(),
            task: None,
        })
    }

    /// Spawn the renewal task. Calling it again is a no-op.
    pub fn start(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            let PendingRenewal {
                source,
                lease,
                options,
                renew_tx,
                done_tx,
            } = pending;
            let kind = lease.kind;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                outcome = keep_alive(source.as_ref(), &lease, &options, &renew_tx) => outcome,
            };
            match &outcome {
                Some(e) => warn!(%kind, error = %e, "lease renewal gave up"),
                None => info!(%kind, "lease reached the end of its renewable life"),
            }
            let _ = done_tx.send(outcome);
        }));
    }

    pub fn renewal_events(&mut self) -> &mut RenewalEvents {
        &mut self.renewals
    }

    pub fn done_event(&mut self) -> &mut DoneEvent {
        &mut self.done
    }

    /// Both event sources at once, for multiplexing in a single `select!`.
    pub fn events(&mut self) -> (&mut RenewalEvents, &mut DoneEvent) {
        (&mut self.renewals, &mut self.done)
    }

    /// Cancel the renewal task and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.pending = None;
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!(kind = %self.kind, "lease renewal task panicked");
        }
    }
}

impl Drop for LeaseWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Renew `lease` until that stops being possible or useful.
async fn keep_alive(
    source: &dyn SecretSource,
    lease: &Lease,
    options: &WatcherOptions,
    renew_tx: &mpsc::UnboundedSender<RenewalEvent>,
) -> Option<RotorError> {
    let increment = lease.duration;
    let duration = lease.duration.min(MAX_TRACKED_LEASE);
    let grace = options.grace_for(duration);
    let mut expires_at = Instant::now() + duration;

    if !lease.renewable {
        debug!(kind = %lease.kind, "lease is not renewable; waiting for its grace period");
        sleep_until(expires_at - grace).await;
        return None;
    }

    loop {
        let remaining = expires_at.saturating_duration_since(Instant::now());
        sleep(remaining.mul_f64(2.0 / 3.0)).await;

        let renewed = timeout_at(expires_at, renew_with_retry(source, lease, increment, options)).await;
        let remaining = match renewed {
            Ok(Ok(remaining)) => remaining,
            Ok(Err(e)) => return Some(e),
            Err(_) => return Some(RotorError::LeaseExpired { kind: lease.kind }),
        };

        let _ = renew_tx.send(RenewalEvent {
            kind: lease.kind,
            remaining,
            renewed_at: Utc::now(),
        });

        if remaining <= grace {
            debug!(
                kind = %lease.kind,
                remaining_secs = remaining.as_secs(),
                grace_secs = grace.as_secs(),
                "renewal no longer extends the lease meaningfully"
            );
            return None;
        }
        expires_at = Instant::now() + remaining.min(MAX_TRACKED_LEASE);
    }
}

async fn renew_with_retry(
    source: &dyn SecretSource,
    lease: &Lease,
    increment: Duration,
    options: &WatcherOptions,
) -> Result<Duration, RotorError> {
    (|| async { source.renew(lease, increment).await })
        .retry(options.retry_policy())
        .when(|e: &RotorError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(
                kind = %lease.kind,
                "lease renewal retrying after error {}, sleeping {:?}",
                err, dur
            );
        })
        .await
}
