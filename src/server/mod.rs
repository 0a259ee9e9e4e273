//! HTTP surface: a health probe over the active database connection.

pub mod router;

pub use router::{RotorState, rotor_router};
