//! Per-node database connection settings.
//!
//! The pool never interprets these beyond handing them to the connector
//! that opens a node's handle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

use crate::pool::PoolConfig;

/// Database driver family. Opaque to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
    Sqlserver,
}

impl DriverKind {
    /// Conventional listening port for the driver, 0 for file databases.
    pub fn default_port(&self) -> u16 {
        match self {
            DriverKind::Postgres => 5432,
            DriverKind::Mysql => 3306,
            DriverKind::Sqlite => 0,
            DriverKind::Sqlserver => 1433,
        }
    }
}

/// Connection settings for one node.
///
/// Limit fields left at zero inherit the pool-wide values; see
/// [`DatabaseConfig::effective_limits`].
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DriverKind,

    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub database: String,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum idle connections in the handle's own pool (0 = inherit)
    #[serde(default)]
    pub max_idle_conns: u32,

    /// Maximum open connections in the handle's own pool (0 = inherit)
    #[serde(default)]
    pub max_open_conns: u32,

    /// Maximum lifetime of one physical connection (None = inherit)
    #[serde(default)]
    pub conn_max_lifetime: Option<Duration>,
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            host: "localhost".to_string(),
            port: DriverKind::default().default_port(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            charset: default_charset(),
            timezone: default_timezone(),
            max_idle_conns: 0,
            max_open_conns: 0,
            conn_max_lifetime: None,
        }
    }
}

impl DatabaseConfig {
    /// Postgres settings for `host` and `database` on the default port.
    pub fn postgres(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self::for_driver(DriverKind::Postgres, host, database)
    }

    /// MySQL settings for `host` and `database` on the default port.
    pub fn mysql(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self::for_driver(DriverKind::Mysql, host, database)
    }

    fn for_driver(
        driver: DriverKind,
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            host: host.into(),
            port: driver.default_port(),
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// `host:port`, or just the host for file databases.
    pub fn address(&self) -> String {
        if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Limits for the node handle's internal pool, falling back to the
    /// pool-wide values where this config leaves them unset.
    pub fn effective_limits(&self, pool: &PoolConfig) -> HandleLimits {
        HandleLimits {
            max_open: if self.max_open_conns > 0 {
                self.max_open_conns
            } else {
                pool.max_connections
            },
            max_idle: if self.max_idle_conns > 0 {
                self.max_idle_conns
            } else {
                pool.min_connections
            },
            max_lifetime: self.conn_max_lifetime.unwrap_or(pool.conn_max_lifetime),
            max_idle_time: pool.conn_max_idle_time,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("timezone", &self.timezone)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_open_conns", &self.max_open_conns)
            .field("conn_max_lifetime", &self.conn_max_lifetime)
            .finish()
    }
}

/// Limits applied once to a node handle's internal pool when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleLimits {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime: Duration,
    pub max_idle_time: Duration,
}
