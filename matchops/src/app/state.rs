//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::deploy::audit::CommandAuditor;
use crate::deploy::backends::Backends;
use crate::deploy::backup::{FsBackupBackend, FsBackupOptions};
use crate::deploy::executor::DeploymentService;
use crate::deploy::fsm::FsmSettings;
use crate::deploy::migrations::DirMigrationLoader;
use crate::deploy::release::CommandReleaseTarget;
use crate::deploy::verify::HttpVerifier;
use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::security::authn::TokenVerifier;
use crate::security::authz::RolePermissions;
use crate::security::monitor::{NoopResponder, SecurityMonitor};
use crate::security::pipeline::SecurityPipeline;
use crate::security::rate_limit::RateLimiters;
use crate::security::rules::RuleCache;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeploySettings, SecuritySettings, Settings, JWT_SECRET_ENV};
use crate::store::FileStore;

/// Main application state
pub struct AppState {
    /// Persisted collections
    pub store: Arc<FileStore>,

    /// Release pipeline
    pub deployments: Arc<DeploymentService>,

    /// Per-request security validation
    pub pipeline: Arc<SecurityPipeline>,

    /// Background security sweeps
    pub monitor: Arc<SecurityMonitor>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(layout: &StorageLayout, settings: &Settings) -> Result<Self, OpsError> {
        info!("Initializing application state...");

        layout.setup().await?;
        let store = Arc::new(FileStore::open(&layout.db_dir()).await?);

        let deployments = init_deployments(layout, &settings.deploy, store.clone())?;

        let live_rules = Arc::new(RuleCache::new());
        let limiters = Arc::new(RateLimiters::new(
            settings.security.auth_path_prefix.clone(),
            settings.security.auth_limiter.clone(),
            settings.security.general_limiter.clone(),
        ));
        let pipeline = Arc::new(init_pipeline(
            &settings.security,
            store.clone(),
            live_rules.clone(),
            limiters.clone(),
        )?);

        let monitor = Arc::new(SecurityMonitor::new(
            store.clone(),
            store.clone(),
            live_rules,
            limiters,
            Arc::new(NoopResponder),
            (&settings.monitor).into(),
        ));

        Ok(Self {
            store,
            deployments,
            pipeline,
            monitor,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), OpsError> {
        info!("Shutting down application state...");
        Ok(())
    }
}

/// Release pipeline wired to the configured commands and probes
pub fn init_deployments(
    layout: &StorageLayout,
    settings: &DeploySettings,
    store: Arc<FileStore>,
) -> Result<Arc<DeploymentService>, OpsError> {
    let verifier = Arc::new(HttpVerifier::new(
        settings.environments.clone(),
        settings.thresholds.clone(),
        settings.probe_timeout(),
    )?);

    let backends = Backends {
        health: verifier.clone(),
        auditor: Arc::new(CommandAuditor::new(
            settings.audit_command.clone(),
            settings.command_timeout(),
        )),
        backup: Arc::new(FsBackupBackend::new(FsBackupOptions {
            backups_dir: layout.backups_dir(),
            app_dir: settings.app_dir.clone().map(Dir::new),
            dump_command: settings.dump_command.clone(),
            restore_command: settings.restore_command.clone(),
            command_timeout: settings.command_timeout(),
        })),
        migrations: Arc::new(DirMigrationLoader::new(
            layout.migrations_dir(),
            settings.migrations_interpreter.clone(),
            settings.command_timeout(),
        )),
        release: Arc::new(CommandReleaseTarget::new(
            settings.release.clone(),
            settings.command_timeout(),
        )),
        verifier,
    };

    Ok(Arc::new(DeploymentService::new(
        backends,
        store.clone(),
        store,
        FsmSettings {
            stage_timeout: settings.stage_timeout(),
        },
    )))
}

/// Token verifier over the configured shared secret
pub fn init_token_verifier(settings: &SecuritySettings) -> Result<TokenVerifier, OpsError> {
    let secret = settings.jwt_secret.as_ref().ok_or_else(|| {
        OpsError::ConfigError(format!(
            "JWT secret not configured, set security.jwt_secret or {}",
            JWT_SECRET_ENV
        ))
    })?;
    Ok(TokenVerifier::new(secret))
}

fn init_pipeline(
    settings: &SecuritySettings,
    store: Arc<FileStore>,
    live_rules: Arc<RuleCache>,
    limiters: Arc<RateLimiters>,
) -> Result<SecurityPipeline, OpsError> {
    let permissions = match &settings.role_grants {
        Some(grants) => RolePermissions::new(grants.clone()),
        None => RolePermissions::marketplace_defaults(),
    };

    Ok(SecurityPipeline::new(
        init_token_verifier(settings)?,
        Arc::new(permissions),
        limiters,
        store.clone(),
        live_rules,
        store,
    ))
}
