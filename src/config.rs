//! Runtime configuration loaded from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a compiled-in default so the server starts with an empty
//! environment. Unparseable values fall back to the default rather than
//! aborting startup. `.env` files are honored via `dotenvy` in `main`.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_HUB_QUEUE_CAPACITY: usize = 256;
const DEFAULT_WS_PING_INTERVAL_SECS: u64 = 20;
const DEFAULT_WS_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BOOKING_STORE_RETRIES: usize = 3;
const DEFAULT_BOOKING_STORE_RETRY_BASE_MS: u64 = 25;
const DEFAULT_SEAT_FLUSH_INTERVAL_MS: u64 = 250;
const DEFAULT_BOOKING_MINUTES: i64 = 60;

/// Bounded retry policy for booking-store writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never zero.
    pub attempts: usize,
    /// Linear back-off step: attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres URL. `None` runs with in-memory bookings and no seat persistence.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// YAML seed file. `None` uses the embedded default catalog.
    pub seed_file: Option<PathBuf>,
    /// Per-connection outbound queue capacity. A full queue drops the connection.
    pub hub_queue_capacity: usize,
    pub ws_ping_interval: Duration,
    pub ws_idle_timeout: Duration,
    pub store_retry: RetryPolicy,
    pub seat_flush_interval: Duration,
    /// Window length used when a booking request omits `endTime`.
    pub default_booking_duration: time::Duration,
    /// Token required by the seat-correction endpoint. `None` disables it.
    pub admin_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            seed_file: None,
            hub_queue_capacity: DEFAULT_HUB_QUEUE_CAPACITY,
            ws_ping_interval: Duration::from_secs(DEFAULT_WS_PING_INTERVAL_SECS),
            ws_idle_timeout: Duration::from_secs(DEFAULT_WS_IDLE_TIMEOUT_SECS),
            store_retry: RetryPolicy {
                attempts: DEFAULT_BOOKING_STORE_RETRIES,
                base_delay: Duration::from_millis(DEFAULT_BOOKING_STORE_RETRY_BASE_MS),
            },
            seat_flush_interval: Duration::from_millis(DEFAULT_SEAT_FLUSH_INTERVAL_MS),
            default_booking_duration: time::Duration::minutes(DEFAULT_BOOKING_MINUTES),
            admin_token: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: env_opt("DATABASE_URL"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1),
            seed_file: env_opt("SEED_FILE").map(PathBuf::from),
            hub_queue_capacity: env_parse("HUB_QUEUE_CAPACITY", DEFAULT_HUB_QUEUE_CAPACITY).max(1),
            ws_ping_interval: Duration::from_secs(
                env_parse("WS_PING_INTERVAL_SECS", DEFAULT_WS_PING_INTERVAL_SECS).max(1),
            ),
            ws_idle_timeout: Duration::from_secs(
                env_parse("WS_IDLE_TIMEOUT_SECS", DEFAULT_WS_IDLE_TIMEOUT_SECS).max(1),
            ),
            store_retry: RetryPolicy {
                attempts: env_parse("BOOKING_STORE_RETRIES", DEFAULT_BOOKING_STORE_RETRIES).max(1),
                base_delay: Duration::from_millis(env_parse(
                    "BOOKING_STORE_RETRY_BASE_MS",
                    DEFAULT_BOOKING_STORE_RETRY_BASE_MS,
                )),
            },
            seat_flush_interval: Duration::from_millis(
                env_parse("SEAT_FLUSH_INTERVAL_MS", DEFAULT_SEAT_FLUSH_INTERVAL_MS).max(1),
            ),
            default_booking_duration: time::Duration::minutes(
                env_parse("DEFAULT_BOOKING_MINUTES", DEFAULT_BOOKING_MINUTES).max(1),
            ),
            admin_token: env_opt("ADMIN_TOKEN"),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
