//! matchops - Entry Point
//!
//! Runs the security-guarded API and the security monitor, or drives a
//! single release from the command line.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;

use matchops::app::options::AppOptions;
use matchops::app::run::run;
use matchops::app::state::{init_deployments, init_token_verifier};
use matchops::errors::OpsError;
use matchops::logs::{init_logging, LogOptions};
use matchops::models::deployment::DeploymentOptions;
use matchops::security::authn::Claims;
use matchops::storage::layout::StorageLayout;
use matchops::storage::settings::Settings;
use matchops::store::FileStore;
use matchops::utils::version_info;

use tracing::{error, info};

const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {}", e),
        }
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // One-shot commands log to stdout only
    let one_shot = cli_args.contains_key("deploy") || cli_args.contains_key("issue-token");
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: (!one_shot).then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("issue-token") {
        return issue_token(&cli_args, &settings);
    }

    if cli_args.contains_key("deploy") {
        return deploy(&cli_args, &layout, &settings).await;
    }

    // Run the service
    let options = AppOptions::from_settings(layout, &settings);
    info!("Running matchops {} with options: {:?}", version.version, options);
    match run(options, settings, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run matchops: {e}");
            ExitCode::FAILURE
        }
    }
}

fn issue_token(cli_args: &HashMap<String, String>, settings: &Settings) -> ExitCode {
    let (Some(sub), Some(role)) = (cli_args.get("sub"), cli_args.get("role")) else {
        eprintln!("Usage: matchops --issue-token --sub=<user id> --role=<role> [--ttl=<seconds>]");
        return ExitCode::FAILURE;
    };
    let ttl = cli_args
        .get("ttl")
        .and_then(|ttl| ttl.parse::<i64>().ok())
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

    let token = init_token_verifier(&settings.security)
        .and_then(|verifier| verifier.issue(&Claims::new(sub.as_str(), role.as_str(), ttl)));
    match token {
        Ok(token) => {
            println!("{}", token);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "Failed to issue token:".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn deploy(
    cli_args: &HashMap<String, String>,
    layout: &StorageLayout,
    settings: &Settings,
) -> ExitCode {
    let (Some(environment), Some(release)) =
        (cli_args.get("environment"), cli_args.get("release"))
    else {
        eprintln!(
            "Usage: matchops --deploy --environment=<development|staging|production> \
             --release=<x.y.z> [--rollback=<x.y.z>] [--config=<json>]"
        );
        return ExitCode::FAILURE;
    };

    let config = match cli_args.get("config").map(|c| serde_json::from_str(c)) {
        Some(Ok(config)) => Some(config),
        Some(Err(e)) => {
            eprintln!("{} {}", "Invalid --config JSON:".red(), e);
            return ExitCode::FAILURE;
        }
        None => None,
    };

    let options = DeploymentOptions {
        environment: environment.clone(),
        version: release.clone(),
        rollback_version: cli_args.get("rollback").cloned(),
        config,
    };

    let result: Result<_, OpsError> = async {
        layout.setup().await?;
        let store = Arc::new(FileStore::open(&layout.db_dir()).await?);
        let deployments = init_deployments(layout, &settings.deploy, store)?;
        Ok(deployments.deploy(options).await?)
    }
    .await;

    match result {
        Ok(outcome) => {
            println!(
                "{} {} deployed to {} (deployment {})",
                "Success:".green().bold(),
                outcome.version,
                outcome.environment,
                outcome.deployment_id
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "Deployment failed:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
