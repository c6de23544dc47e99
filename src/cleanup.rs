//! Cleanup Coordinator (C8) — §4.7.
//!
//! Signal handling and forced shutdown, grounded on
//! `orchestrator-server.rs`'s `shutdown_signal()` (the same `ctrl_c`/
//! `SIGTERM` `tokio::select!` this crate has no HTTP server to attach it
//! to, so it's exposed as a standalone coordinator instead of
//! `axum::serve(...).with_graceful_shutdown(...)`), plus the §4.7
//! "stopAllTools" fan-out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A tool an agent exposes that can be asked to release its resources.
/// Per-tool failures are logged, never propagated (§4.7).
#[async_trait::async_trait]
pub trait StoppableTool: Send + Sync {
    fn name(&self) -> &str;
    async fn stop(&self) -> crate::error::Result<()>;
}

/// Anything that can enumerate the tools it currently holds, so
/// [`CleanupCoordinator::stop_all_tools`] can fan out over a whole graph's
/// worth of agents polymorphically (§4.7 "invokes `stop()` on every tool
/// exposed by the provided agents").
pub trait HasTools: Send + Sync {
    fn tools(&self) -> Vec<Arc<dyn StoppableTool>>;
}

/// Installs process-termination signal handling and forced shutdown.
pub struct CleanupCoordinator;

impl CleanupCoordinator {
    /// Install `SIGINT`/`SIGTERM` handling: on the first signal, run
    /// `cleanup`, then force-exit after `exit_delay` if `cleanup` hasn't
    /// returned by then. A second signal received while shutting down
    /// exits immediately (§4.7).
    ///
    /// Spawns its own background task and returns immediately; intended to
    /// be called once, near process start.
    pub fn install<F, Fut>(cleanup: F, exit_delay: Duration)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            Self::wait_for_termination_signal().await;
            tracing::info!("termination signal received, running cleanup");

            tokio::spawn(async move {
                Self::wait_for_termination_signal().await;
                tracing::warn!("second termination signal received, exiting immediately");
                std::process::exit(1);
            });

            tokio::spawn(async move {
                tokio::time::sleep(exit_delay).await;
                tracing::warn!(
                    delay_ms = exit_delay.as_millis() as u64,
                    "cleanup exit delay elapsed, forcing exit"
                );
                std::process::exit(0);
            });

            cleanup().await;
            tracing::info!("cleanup complete, exiting");
            std::process::exit(0);
        });
    }

    async fn wait_for_termination_signal() {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL-C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received CTRL-C"),
            _ = terminate => tracing::info!("received SIGTERM"),
        }
    }

    /// Stop every tool exposed by `agents`, logging but not propagating
    /// per-tool failures (§4.7).
    pub async fn stop_all_tools(agents: &[Arc<dyn HasTools>]) {
        for agent in agents {
            for tool in agent.tools() {
                if let Err(e) = tool.stop().await {
                    tracing::warn!(tool = tool.name(), error = %e, "failed to stop tool");
                }
            }
        }
    }
}
