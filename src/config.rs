//! Stream-core configuration.
//!
//! Follows the `ServerConfig::load()` convention from `orchestrator::config`:
//! a plain struct with typed defaults, overridable from the environment at
//! process start. The stream-core recognises exactly one environment
//! variable per §6 of the spec (`MAX_STREAM_LIFETIME_MS`); the remaining
//! numeric knobs are spec-fixed defaults that are still exposed on the
//! struct so tests can shrink them (e.g. the gap threshold) without waiting
//! on real wall-clock time.

use std::time::Duration;

/// Default maximum lifetime of a single stream connection (10 minutes).
pub const DEFAULT_MAX_STREAM_LIFETIME_MS: u64 = 600_000;

/// Default gap threshold between text sequences before queued operations
/// and summaries are drained (2 seconds).
pub const DEFAULT_GAP_THRESHOLD_MS: u64 = 2_000;

/// Default cap on the incremental parser's append-only buffer (5 MiB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 5 * 1024 * 1024;

/// Default size of the Graph Session's previous-summary ring.
pub const DEFAULT_SUMMARY_RING_CAPACITY: usize = 3;

/// Default delay before a forced hard exit once the Cleanup Coordinator has
/// run its cleanup function (2 seconds).
pub const DEFAULT_CLEANUP_EXIT_DELAY_MS: u64 = 2_000;

/// Runtime configuration for the stream-core.
///
/// Constructed once per process (or once per test) and threaded explicitly
/// into the components that need it, rather than read ambiently — the
/// teacher's `ServerConfig` is passed into `create_router`/`DatabaseConnection`
/// the same way.
#[derive(Debug, Clone)]
pub struct StreamCoreConfig {
    /// Forced-cleanup lifetime for a single `StreamHelper` connection.
    pub max_stream_lifetime: Duration,
    /// Minimum idle time between two text sequences before queued
    /// operations/summaries are drained.
    pub gap_threshold: Duration,
    /// Cap on `IncrementalStreamParser`'s append-only buffer.
    pub max_buffer_bytes: usize,
    /// Capacity of the Graph Session's previous-summary ring.
    pub summary_ring_capacity: usize,
    /// Delay between the Cleanup Coordinator running its cleanup function
    /// and forcing process exit.
    pub cleanup_exit_delay: Duration,
}

impl Default for StreamCoreConfig {
    fn default() -> Self {
        Self {
            max_stream_lifetime: Duration::from_millis(DEFAULT_MAX_STREAM_LIFETIME_MS),
            gap_threshold: Duration::from_millis(DEFAULT_GAP_THRESHOLD_MS),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            summary_ring_capacity: DEFAULT_SUMMARY_RING_CAPACITY,
            cleanup_exit_delay: Duration::from_millis(DEFAULT_CLEANUP_EXIT_DELAY_MS),
        }
    }
}

/// Initialize `tracing`'s global subscriber from `RUST_LOG`, defaulting to
/// `info`, the same way `orchestrator-server.rs` does at process start.
/// This crate has no binary of its own, so the call is exposed as a library
/// helper instead and uses `try_init` rather than `init`: a host process may
/// already have installed its own subscriber, and failing that silently
/// (rather than panicking) is the right behavior for a library entry point.
pub fn init_tracing() {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(rust_log).try_init();
}

impl StreamCoreConfig {
    /// Build configuration from the environment, falling back to spec
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("MAX_STREAM_LIFETIME_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.max_stream_lifetime = Duration::from_millis(ms),
                Err(e) => {
                    tracing::warn!(
                        "MAX_STREAM_LIFETIME_MS={raw:?} is not a valid u64 ({e}); using default {DEFAULT_MAX_STREAM_LIFETIME_MS}ms"
                    );
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = StreamCoreConfig::default();
        assert_eq!(config.max_stream_lifetime, Duration::from_secs(600));
        assert_eq!(config.gap_threshold, Duration::from_secs(2));
        assert_eq!(config.max_buffer_bytes, 5 * 1024 * 1024);
        assert_eq!(config.summary_ring_capacity, 3);
    }

    #[test]
    fn from_env_ignores_unparsable_override() {
        std::env::set_var("MAX_STREAM_LIFETIME_MS", "not-a-number");
        let config = StreamCoreConfig::from_env();
        assert_eq!(config.max_stream_lifetime, Duration::from_secs(600));
        std::env::remove_var("MAX_STREAM_LIFETIME_MS");
    }

    #[test]
    fn from_env_applies_valid_override() {
        std::env::set_var("MAX_STREAM_LIFETIME_MS", "1234");
        let config = StreamCoreConfig::from_env();
        assert_eq!(config.max_stream_lifetime, Duration::from_millis(1234));
        std::env::remove_var("MAX_STREAM_LIFETIME_MS");
    }

    #[test]
    fn init_tracing_is_safe_to_call_more_than_once() {
        init_tracing();
        init_tracing();
    }
}
