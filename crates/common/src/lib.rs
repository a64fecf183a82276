//! Shared identifiers and small types for Tidepool.
//!
//! Everything here is plain data: no I/O and no runtime state, so both the
//! configuration crate and the pool crate can depend on it freely.

pub mod ids;
#[cfg(feature = "runtime")]
pub mod observability;
pub mod types;

pub use ids::{LeaseId, NodeId};
pub use types::{NodeRole, ParseRoleError};
