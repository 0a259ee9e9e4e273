pub mod config;
pub mod db;
pub mod error;
pub mod renewal;
pub mod server;
pub mod vault;

pub use db::{ConnectionManager, ConnectionParameters};
pub use error::RotorError;
pub use renewal::{RenewResult, RenewalCoordinator};
pub use vault::{DatabaseCredentials, Lease, LeaseKind, SecretSource, VaultClient};
