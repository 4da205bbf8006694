//! Startup configuration. Read once from the environment, validated, then
//! shared by reference.

use {
    crate::domain::money::Currency,
    chrono::Duration,
    std::{env, fmt, net::SocketAddr, str::FromStr, time},
    thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentMode {
    /// Fulfill inside the webhook request.
    Inline,
    /// Reserve, enqueue, acknowledge; a worker fulfills.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: time::Duration,
    pub max_keys: usize,
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: time::Duration::from_secs(60),
            max_keys: 10_000,
            trust_proxy: false,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutConfig {
    pub secret_key: String,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: Currency,
}

impl fmt::Debug for CheckoutConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckoutConfig")
            .field("secret_key", &"<redacted>")
            .field("success_url", &self.success_url)
            .field("cancel_url", &self.cancel_url)
            .field("currency", &self.currency)
            .finish()
    }
}

/// Upper bound for lease and rate-limit windows: one day.
const MAX_WINDOW_SECS: i64 = 86_400;
const MAX_RETENTION_DAYS: i64 = 3_650;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub stripe_webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub reservation_lease: Duration,
    pub ledger_retention: Duration,
    pub fulfillment_mode: FulfillmentMode,
    pub request_timeout: time::Duration,
    pub rate_limit: RateLimitConfig,
    pub checkout: Option<CheckoutConfig>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("stripe_webhook_secret", &"<redacted>")
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("reservation_lease", &self.reservation_lease)
            .field("ledger_retention", &self.ledger_retention)
            .field("fulfillment_mode", &self.fulfillment_mode)
            .field("request_timeout", &self.request_timeout)
            .field("rate_limit", &self.rate_limit)
            .field("checkout", &self.checkout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let stripe_webhook_secret =
            get("STRIPE_WEBHOOK_SECRET").ok_or(ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))?;
        let database_url = get("DATABASE_URL");

        let bind_addr = parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let webhook_tolerance_secs: i64 = parse_or(&get, "WEBHOOK_TOLERANCE_SECS", 300)?;
        if !(1..=3600).contains(&webhook_tolerance_secs) {
            return Err(invalid("WEBHOOK_TOLERANCE_SECS", "must be within 1..=3600"));
        }

        let lease_secs: i64 = parse_or(&get, "RESERVATION_LEASE_SECS", 300)?;
        if !(1..=MAX_WINDOW_SECS).contains(&lease_secs) {
            return Err(invalid("RESERVATION_LEASE_SECS", "must be within 1..=86400"));
        }

        let retention_days: i64 = parse_or(&get, "LEDGER_RETENTION_DAYS", 30)?;
        if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(invalid("LEDGER_RETENTION_DAYS", "must be within 1..=3650"));
        }

        let fulfillment_mode = match get("FULFILLMENT_MODE").as_deref() {
            None | Some("inline") => FulfillmentMode::Inline,
            Some("deferred") => FulfillmentMode::Deferred,
            Some(other) => {
                return Err(invalid(
                    "FULFILLMENT_MODE",
                    format!("expected inline or deferred, got {other}"),
                ));
            }
        };
        if fulfillment_mode == FulfillmentMode::Deferred && database_url.is_none() {
            return Err(invalid("FULFILLMENT_MODE", "deferred requires DATABASE_URL"));
        }

        let timeout_secs: u64 = parse_or(&get, "REQUEST_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            return Err(invalid("REQUEST_TIMEOUT_SECS", "must be at least 1"));
        }

        let defaults = RateLimitConfig::default();
        let window_secs: u64 = parse_or(&get, "RATE_LIMIT_WINDOW_SECS", defaults.window.as_secs())?;
        if window_secs > MAX_WINDOW_SECS as u64 {
            return Err(invalid("RATE_LIMIT_WINDOW_SECS", "must be at most 86400"));
        }
        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&get, "RATE_LIMIT_MAX_REQUESTS", defaults.max_requests)?,
            window: time::Duration::from_secs(window_secs),
            max_keys: parse_or(&get, "RATE_LIMIT_MAX_KEYS", defaults.max_keys)?,
            trust_proxy: parse_or(&get, "RATE_LIMIT_TRUST_PROXY", defaults.trust_proxy)?,
        };
        if rate_limit.max_requests == 0 || rate_limit.window.is_zero() || rate_limit.max_keys == 0 {
            return Err(invalid("RATE_LIMIT_*", "limits must be positive"));
        }

        let checkout = match get("STRIPE_SECRET_KEY") {
            None => None,
            Some(secret_key) => {
                let currency = get("CHECKOUT_CURRENCY").unwrap_or_else(|| "usd".into());
                Some(CheckoutConfig {
                    secret_key,
                    success_url: get("CHECKOUT_SUCCESS_URL")
                        .ok_or(ConfigError::Missing("CHECKOUT_SUCCESS_URL"))?,
                    cancel_url: get("CHECKOUT_CANCEL_URL")
                        .ok_or(ConfigError::Missing("CHECKOUT_CANCEL_URL"))?,
                    currency: Currency::try_from(currency.as_str())
                        .map_err(|e| invalid("CHECKOUT_CURRENCY", e.to_string()))?,
                })
            }
        };

        Ok(Self {
            bind_addr,
            database_url,
            stripe_webhook_secret,
            webhook_tolerance_secs,
            reservation_lease: Duration::seconds(lease_secs),
            ledger_retention: Duration::days(retention_days),
            fulfillment_mode,
            request_timeout: time::Duration::from_secs(timeout_secs),
            rate_limit,
            checkout,
        })
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(key, e.to_string())),
    }
}
