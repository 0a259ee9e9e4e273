//! Lease renewal: per-lease watchers, the two-lease renewal cycle and the
//! rotation loop that re-authenticates and reconnects when leases run out.

pub mod coordinator;
pub mod result;
pub mod watcher;

pub use coordinator::{CycleOutcome, RenewalCoordinator, RotationState};
pub use result::RenewResult;
pub use watcher::{DoneEvent, LeaseWatcher, RenewalEvent, RenewalEvents, WatcherOptions};
