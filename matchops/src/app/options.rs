//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::monitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable the HTTP server
    pub enable_server: bool,

    /// Enable the security monitor worker
    pub enable_monitor: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Security monitor worker options
    pub monitor_worker: monitor::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            enable_server: true,
            enable_monitor: true,
            server: ServerOptions::default(),
            monitor_worker: monitor::Options::default(),
        }
    }
}

impl AppOptions {
    /// Options for `layout` as configured by `settings`
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            layout,
            enable_server: settings.server.enabled,
            enable_monitor: settings.monitor.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            monitor_worker: monitor::Options {
                interval: Duration::from_secs(settings.monitor.interval_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8710,
        }
    }
}
