//! Configuration types for Tidepool.
//!
//! The embedding application builds these values (by hand or by
//! deserializing them from whatever format it owns) and hands them to the
//! pool once at construction:
//!
//! - [`DatabaseConfig`]: how to open one node's handle
//! - [`NodeConfig`]: a node's identity, role and weight
//! - [`PoolConfig`]: pool-wide limits, health checking, balancing and metrics
//! - [`ClusterConfig`]: a pool config plus its static node list
//!
//! # Example
//!
//! ```ignore
//! use tidepool_config::{ClusterConfig, DatabaseConfig, NodeConfig, PoolConfig};
//!
//! let cluster = ClusterConfig {
//!     pool: PoolConfig::default(),
//!     nodes: vec![
//!         NodeConfig::primary("db-1", DatabaseConfig::postgres("10.0.0.1", "app")),
//!         NodeConfig::replica("db-2", DatabaseConfig::postgres("10.0.0.2", "app")),
//!     ],
//! };
//! cluster.validate()?;
//! ```

pub mod cluster;
pub mod database;
pub mod error;
pub mod pool;
pub mod validate;

pub use cluster::{ClusterConfig, NodeConfig};
pub use database::{DatabaseConfig, DriverKind, HandleLimits};
pub use error::ConfigError;
pub use pool::{LoadBalanceStrategy, PoolConfig};
pub use validate::{ValidationResult, ValidationWarning};
