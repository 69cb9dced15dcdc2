//! Periodic security sweep worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::security::monitor::SecurityMonitor;

/// Monitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Delay before the first sweep
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the monitor worker
///
/// Sweep errors are logged and the loop carries on.
pub async fn run<S, F>(
    options: &Options,
    monitor: &SecurityMonitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Security monitor worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Security monitor worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        match monitor.tick().await {
            Ok(Some(summary)) => {
                if summary.threats + summary.anomalies > 0 {
                    info!(
                        "Security sweep: {} threats, {} anomalies over {} log entries",
                        summary.threats, summary.anomalies, summary.entries
                    );
                }
            }
            Ok(None) => debug!("Previous security sweep still running"),
            Err(e) => error!("Security sweep failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Security monitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
