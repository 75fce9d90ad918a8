use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::services::event_source::RetryPolicy;
use crate::services::recompute::RecomputeMode;

const DEFAULT_DATABASE_URL: &str = "sqlite:./concept_mastery.db?mode=rwc";
const DEFAULT_EVENTS_SERVICE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub database_url: String,
    pub events_service_url: String,
    pub retry: RetryPolicy,
    pub recompute_mode: RecomputeMode,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8001);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let database_url =
            env_string("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let events_service_url = env_string("LEARNING_EVENTS_SERVICE_URL")
            .unwrap_or_else(|| DEFAULT_EVENTS_SERVICE_URL.to_string());

        let recompute_mode = env_string("RECOMPUTE_MODE")
            .as_deref()
            .and_then(RecomputeMode::parse)
            .unwrap_or(RecomputeMode::Reset);

        Self {
            host,
            port,
            log_level,
            database_url,
            events_service_url,
            retry: retry_policy_from_env(),
            recompute_mode,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn retry_policy_from_env() -> RetryPolicy {
    let defaults = RetryPolicy::default();

    let max_attempts = env_u64("EVENT_SOURCE_MAX_ATTEMPTS")
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v >= 1)
        .unwrap_or(defaults.max_attempts);
    let base_backoff = env_u64("EVENT_SOURCE_BACKOFF_BASE_MS")
        .map(Duration::from_millis)
        .unwrap_or(defaults.base_backoff);
    let backoff_factor = env_string("EVENT_SOURCE_BACKOFF_FACTOR")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 1.0)
        .unwrap_or(defaults.backoff_factor);
    let attempt_timeout = env_u64("EVENT_SOURCE_TIMEOUT_MS")
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
        .unwrap_or(defaults.attempt_timeout);

    RetryPolicy {
        max_attempts,
        base_backoff,
        backoff_factor,
        attempt_timeout,
        ..defaults
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.trim().parse().ok()
}
