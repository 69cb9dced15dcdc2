//! Settings file management

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deploy::process::CommandSpec;
use crate::deploy::release::ReleaseCommands;
use crate::deploy::verify::{EnvironmentEndpoints, PerformanceThresholds};
use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::deployment::Environment;
use crate::security::monitor::MonitorSettings;
use crate::security::rate_limit::LimiterConfig;

/// Overrides `security.jwt_secret`
pub const JWT_SECRET_ENV: &str = "MATCHOPS_JWT_SECRET";

/// Service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub monitor: MonitorFileSettings,
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is missing
    pub async fn load(file: &File) -> Result<Self, OpsError> {
        let mut settings = if file.exists().await {
            file.read_json::<Settings>().await?
        } else {
            info!(
                "No settings file at {}, using defaults",
                file.path().display()
            );
            Settings::default()
        };

        if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
            if !secret.is_empty() {
                debug!("JWT secret taken from {}", JWT_SECRET_ENV);
                settings.security.jwt_secret = Some(SecretString::from(secret));
            }
        }

        Ok(settings)
    }
}

fn default_true() -> bool {
    true
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8710
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Request validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// HS256 secret shared with the token issuer
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<SecretString>,

    /// Paths under this prefix use the auth limiter
    #[serde(default = "default_auth_path_prefix")]
    pub auth_path_prefix: String,

    #[serde(default = "LimiterConfig::auth_default")]
    pub auth_limiter: LimiterConfig,

    #[serde(default = "LimiterConfig::general_default")]
    pub general_limiter: LimiterConfig,

    /// `resource:action` grants per role, replacing the marketplace defaults
    #[serde(default)]
    pub role_grants: Option<HashMap<String, Vec<String>>>,
}

fn default_auth_path_prefix() -> String {
    "/api/auth".to_string()
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            auth_path_prefix: default_auth_path_prefix(),
            auth_limiter: LimiterConfig::auth_default(),
            general_limiter: LimiterConfig::general_default(),
            role_grants: None,
        }
    }
}

/// Release pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Health endpoints per environment
    #[serde(default)]
    pub environments: HashMap<Environment, EnvironmentEndpoints>,

    #[serde(default)]
    pub thresholds: PerformanceThresholds,

    /// Dependency audit, fails the release on a non-zero exit
    #[serde(default)]
    pub audit_command: Option<CommandSpec>,

    /// Writes a database dump to stdout
    #[serde(default)]
    pub dump_command: Option<CommandSpec>,

    /// Loads a dump given as its last argument
    #[serde(default)]
    pub restore_command: Option<CommandSpec>,

    #[serde(default)]
    pub release: ReleaseCommands,

    /// Application files captured by backups
    #[serde(default)]
    pub app_dir: Option<PathBuf>,

    /// Runs migration scripts
    #[serde(default = "default_migrations_interpreter")]
    pub migrations_interpreter: String,

    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_migrations_interpreter() -> String {
    "sh".to_string()
}

fn default_stage_timeout_secs() -> u64 {
    600
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    10
}

impl DeploySettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            environments: HashMap::new(),
            thresholds: PerformanceThresholds::default(),
            audit_command: None,
            dump_command: None,
            restore_command: None,
            release: ReleaseCommands::default(),
            app_dir: None,
            migrations_interpreter: default_migrations_interpreter(),
            stage_timeout_secs: default_stage_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Security monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorFileSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_brute_force_threshold")]
    pub brute_force_threshold: usize,

    #[serde(default = "default_suspicious_high_threshold")]
    pub suspicious_high_threshold: usize,

    #[serde(default = "default_rate_limit_anomaly_threshold")]
    pub rate_limit_anomaly_threshold: usize,

    #[serde(default = "default_restriction_ttl_secs")]
    pub restriction_ttl_secs: u64,
}

fn default_monitor_interval_secs() -> u64 {
    300
}

fn default_brute_force_threshold() -> usize {
    5
}

fn default_suspicious_high_threshold() -> usize {
    3
}

fn default_rate_limit_anomaly_threshold() -> usize {
    1
}

fn default_restriction_ttl_secs() -> u64 {
    900
}

impl Default for MonitorFileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_monitor_interval_secs(),
            brute_force_threshold: default_brute_force_threshold(),
            suspicious_high_threshold: default_suspicious_high_threshold(),
            rate_limit_anomaly_threshold: default_rate_limit_anomaly_threshold(),
            restriction_ttl_secs: default_restriction_ttl_secs(),
        }
    }
}

impl From<&MonitorFileSettings> for MonitorSettings {
    fn from(settings: &MonitorFileSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            brute_force_threshold: settings.brute_force_threshold,
            suspicious_high_threshold: settings.suspicious_high_threshold,
            rate_limit_anomaly_threshold: settings.rate_limit_anomaly_threshold,
            restriction_ttl: Duration::from_secs(settings.restriction_ttl_secs),
        }
    }
}
