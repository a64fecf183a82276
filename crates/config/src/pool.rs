//! Pool-wide configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::error::ConfigError;

/// Node selection strategy, resolved once when the pool is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// Rotate through candidates with an atomic counter
    #[default]
    RoundRobin,
    /// Uniform random pick
    Random,
    /// Random pick proportional to node weight
    #[serde(alias = "weighted_random")]
    Weighted,
}

impl LoadBalanceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "random" => Ok(LoadBalanceStrategy::Random),
            "weighted" | "weighted_random" => Ok(LoadBalanceStrategy::Weighted),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Immutable pool configuration, supplied once at construction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PoolConfig {
    /// Idle connections each node handle keeps warm
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Open connections allowed per node handle
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,

    /// Maximum lifetime of one physical connection
    #[serde(default = "default_conn_max_lifetime")]
    pub conn_max_lifetime: Duration,

    /// Maximum time a physical connection may sit idle
    #[serde(default = "default_conn_max_idle_time")]
    pub conn_max_idle_time: Duration,

    /// Time allowed to open one node handle at construction
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Interval between background health-check passes
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: Duration,

    /// Timeout for a single node ping
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout: Duration,

    /// Node selection strategy
    #[serde(default)]
    pub load_balance_strategy: LoadBalanceStrategy,

    /// Serve replica requests from the primary when no replica is configured
    #[serde(default = "default_true")]
    pub failover_enabled: bool,

    /// Retries performed by the retry wrapper (not by node selection)
    #[serde(default = "default_retry_attempts")]
    #[validate(range(max = 100))]
    pub retry_attempts: u32,

    /// Pause between retries
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,

    /// Whether queries and connections are recorded
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Interval of the rolling-window rollover tick
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: Duration,

    /// Queries at or above this duration count as slow
    #[serde(default = "default_slow_query_threshold")]
    pub slow_query_threshold: Duration,
}

fn default_min_connections() -> u32 { 5 }
fn default_max_connections() -> u32 { 100 }
fn default_conn_max_lifetime() -> Duration { Duration::from_secs(3600) }
fn default_conn_max_idle_time() -> Duration { Duration::from_secs(600) }
fn default_connect_timeout() -> Duration { Duration::from_secs(10) }
fn default_health_check_interval() -> Duration { Duration::from_secs(30) }
fn default_health_check_timeout() -> Duration { Duration::from_secs(5) }
fn default_true() -> bool { true }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_interval() -> Duration { Duration::from_secs(1) }
fn default_metrics_interval() -> Duration { Duration::from_secs(10) }
fn default_slow_query_threshold() -> Duration { Duration::from_millis(500) }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            conn_max_lifetime: default_conn_max_lifetime(),
            conn_max_idle_time: default_conn_max_idle_time(),
            connect_timeout: default_connect_timeout(),
            health_check_interval: default_health_check_interval(),
            health_check_timeout: default_health_check_timeout(),
            load_balance_strategy: LoadBalanceStrategy::default(),
            failover_enabled: true,
            retry_attempts: default_retry_attempts(),
            retry_interval: default_retry_interval(),
            metrics_enabled: true,
            metrics_interval: default_metrics_interval(),
            slow_query_threshold: default_slow_query_threshold(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration using the given strategy.
    pub fn with_strategy(strategy: LoadBalanceStrategy) -> Self {
        Self {
            load_balance_strategy: strategy,
            ..Default::default()
        }
    }

    /// Create a configuration with short intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            min_connections: 1,
            max_connections: 4,
            connect_timeout: Duration::from_millis(500),
            health_check_interval: Duration::from_millis(200),
            health_check_timeout: Duration::from_millis(100),
            retry_attempts: 2,
            retry_interval: Duration::from_millis(10),
            metrics_interval: Duration::from_millis(50),
            slow_query_threshold: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// Run field range checks and cross-field checks.
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()?;

        let mut problems = Vec::new();
        if self.min_connections > self.max_connections {
            problems.push(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.health_check_interval.is_zero() {
            problems.push("health_check_interval must be non-zero".to_string());
        }
        if self.health_check_timeout.is_zero() {
            problems.push("health_check_timeout must be non-zero".to_string());
        }
        if self.health_check_timeout > self.health_check_interval {
            problems.push(format!(
                "health_check_timeout ({:?}) exceeds health_check_interval ({:?})",
                self.health_check_timeout, self.health_check_interval
            ));
        }
        if self.metrics_enabled && self.metrics_interval.is_zero() {
            problems.push("metrics_interval must be non-zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}
