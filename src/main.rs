use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod commands;
mod config;
mod error;
mod models;
mod ssh_service;
mod sync_service;

use cli::Cli;
use commands::Invocation;
use config::{EnvDefaults, Settings, SettingsManager};
use error::{PsyncError, Severity};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(err),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env = EnvDefaults::from_env();
    let settings_manager = SettingsManager::new()?;
    let settings = settings_manager.load_settings()?;

    init_logging(&settings, cli.debug_requested() || env.debug)?;
    env.warn_ignored();
    debug!(
        settings = %settings_manager.settings_path().display(),
        "Starting psync {}",
        env!("CARGO_PKG_VERSION")
    );

    let invocation = Invocation::new(env, settings)?;
    cli.command.run(&invocation).await
}

fn init_logging(settings: &Settings, debug: bool) -> Result<()> {
    let default_directive = if debug { "psync=debug" } else { "psync=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    match &settings.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Print an error the way its kind asks for and pick the exit code.
fn report(err: anyhow::Error) -> ExitCode {
    let Some(psync_err) = err.downcast_ref::<PsyncError>() else {
        tracing::error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        return ExitCode::FAILURE;
    };

    match psync_err.severity() {
        Severity::Notice => println!("{}", psync_err),
        Severity::Refusal => eprintln!("{}", psync_err),
        Severity::Fatal => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
        }
    }

    ExitCode::from(u8::try_from(psync_err.exit_code()).unwrap_or(1))
}
