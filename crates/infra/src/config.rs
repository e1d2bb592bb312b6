//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `DATABASE_URL` | unset: in-memory storage |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `BILLING_BASE_URL` | unset: in-memory billing accepting everyone |
//! | `BILLING_HTTP_TIMEOUT_MS` | `5000` |
//! | `BILLING_CYCLE_DAYS` | `30` (must be > 0) |
//! | `REQUEST_TIMEOUT_MS` | `10000` |
//! | `REFUND_MODE` | `outbox` (`inline` or `outbox`) |
//! | `OUTBOX_POLL_INTERVAL_MS` | `1000` |
//! | `REFUND_MAX_ATTEMPTS` | `3` |
//! | `REFUND_BASE_DELAY_MS` | `1000` |
//! | `LOG_FORMAT` | `json` (`json` or `pretty`) |

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use submgr_observability::LogFormat;

use crate::outbox::{RefundProcessorConfig, RetryPolicy};
use crate::workflows::RefundMode;

const DEFAULT_BILLING_CYCLE_DAYS: NonZeroU32 = match NonZeroU32::new(30) {
    Some(days) => days,
    None => panic!("default billing cycle must be non-zero"),
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` selects in-memory storage.
    pub database: Option<DatabaseConfig>,
    /// `None` selects in-memory billing.
    pub billing: Option<BillingConfig>,
    pub billing_cycle_days: NonZeroU32,
    pub request_timeout: Duration,
    pub refund_mode: RefundMode,
    pub outbox_poll_interval: Duration,
    pub refund_retry: RetryPolicy,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database: None,
            billing: None,
            billing_cycle_days: DEFAULT_BILLING_CYCLE_DAYS,
            request_timeout: Duration::from_millis(10_000),
            refund_mode: RefundMode::Outbox,
            outbox_poll_interval: Duration::from_millis(1_000),
            refund_retry: RetryPolicy::default(),
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let database = match get("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10u32)?,
            }),
            None => None,
        };

        let billing = match get("BILLING_BASE_URL") {
            Some(base_url) => Some(BillingConfig {
                base_url,
                timeout: millis_or(&get, "BILLING_HTTP_TIMEOUT_MS", 5_000)?,
            }),
            None => None,
        };

        let refund_retry = RetryPolicy {
            max_attempts: parse_or(&get, "REFUND_MAX_ATTEMPTS", defaults.refund_retry.max_attempts)?,
            base_delay: millis_or(&get, "REFUND_BASE_DELAY_MS", 1_000)?,
            ..defaults.refund_retry
        };
        if refund_retry.max_attempts == 0 {
            return Err(invalid("REFUND_MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            database,
            billing,
            billing_cycle_days: parse_or(&get, "BILLING_CYCLE_DAYS", defaults.billing_cycle_days)?,
            request_timeout: millis_or(&get, "REQUEST_TIMEOUT_MS", 10_000)?,
            refund_mode: parse_or(&get, "REFUND_MODE", defaults.refund_mode)?,
            outbox_poll_interval: millis_or(&get, "OUTBOX_POLL_INTERVAL_MS", 1_000)?,
            refund_retry,
            log_format: parse_or(&get, "LOG_FORMAT", defaults.log_format)?,
        })
    }

    /// Refund processor settings derived from this config.
    pub fn refund_processor(&self) -> RefundProcessorConfig {
        let attempt_timeout = self
            .billing
            .as_ref()
            .map(|b| b.timeout)
            .unwrap_or(self.request_timeout);

        RefundProcessorConfig::default()
            .with_poll_interval(self.outbox_poll_interval)
            .with_retry_policy(self.refund_retry)
            .with_attempt_timeout(attempt_timeout)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: ToString,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(key, &raw, e)),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let ms: u64 = parse_or(get, key, default_ms)?;
    if ms == 0 {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}
