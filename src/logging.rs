//! Logging setup for the songgen CLI.
//!
//! Log lines go to stderr so command output on stdout stays pipeable.
//! Pretty console output by default, JSON for machine parsing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
        }
    }
}

/// `RUST_LOG` if set, else `songgen=info` (`songgen=debug` when verbose).
fn filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("songgen={}", level.as_str().to_lowercase())))
}

/// Install the global subscriber. Call once, after config is loaded.
pub fn init(config: LogConfig) {
    let registry = tracing_subscriber::registry().with(filter(config.verbose));

    if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

const NEVER_LOGGED: u64 = u64::MAX;

/// Rate limit for repetitive log lines, such as per-poll progress in watch
/// mode. Runs on tokio's clock so paused-time tests control it.
pub struct LogThrottle {
    interval_ms: u64,
    /// Milliseconds since `origin` of the last accepted line.
    last_ms: AtomicU64,
    origin: Instant,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            last_ms: AtomicU64::new(NEVER_LOGGED),
            origin: Instant::now(),
        }
    }

    /// True at most once per interval. The first call always passes.
    pub fn should_log(&self) -> bool {
        let now_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        let last = self.last_ms.load(Ordering::Relaxed);

        let due = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;
        due && self
            .last_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Let the next line through regardless of timing.
    pub fn reset(&self) {
        self.last_ms.store(NEVER_LOGGED, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn throttle_passes_once_per_interval() {
        let throttle = LogThrottle::new(Duration::from_secs(10));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!throttle.should_log());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_lets_next_line_through() {
        let throttle = LogThrottle::new(Duration::from_secs(100));
        assert!(throttle.should_log());
        throttle.reset();
        assert!(throttle.should_log());
    }

    #[test]
    fn log_config_follows_app_config() {
        let config = AppConfig {
            json_logs: true,
            ..AppConfig::default()
        };
        let log = LogConfig::from(&config);
        assert!(log.json);
        assert!(!log.verbose);
    }
}
