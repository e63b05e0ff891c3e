use crate::cli::Command;
use crate::config::{self, EnvDefaults, Project, Settings};
use crate::error::PsyncError;
use crate::ssh_service::SshClient;
use crate::sync_service::Direction;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

mod init;
mod replicas;
mod sync;

/// State shared by every command of one process run.
#[derive(Debug)]
pub struct Invocation {
    pub env: EnvDefaults,
    pub settings: Settings,
    pub ssh: SshClient,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(env: EnvDefaults, settings: Settings) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        let ssh = SshClient::new(settings.ssh_program.clone());
        Ok(Self {
            env,
            settings,
            ssh,
            cwd,
        })
    }

    /// Locate and load the project config governing the current directory.
    pub fn open_project(&self) -> Result<Project> {
        let path = config::locate(&self.env, &self.cwd, true).ok_or(PsyncError::NoConfigFound)?;
        tracing::debug!(path = %path.display(), "Using project config");
        Ok(Project::load(path, &self.env)?)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.probe_timeout_ms)
    }
}

impl Command {
    pub async fn run(self, invocation: &Invocation) -> Result<()> {
        match self {
            Command::Init(args) => init::run(args, invocation),
            Command::Replicas { action } => replicas::run(action, invocation).await,
            Command::Push(args) => sync::run(Direction::Push, args, invocation).await,
            Command::Pull(args) => sync::run(Direction::Pull, args, invocation).await,
        }
    }
}

/// Ask a yes/no question on stdin. Only `y` counts as yes.
fn confirm(prompt: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{}\n>>> ", prompt)?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read the answer")?;
    Ok(answer.trim() == "y")
}

/// Print where the previous config went after a persist.
fn report_backup(backup: Option<PathBuf>) {
    if let Some(backup) = backup {
        println!("Config backed up at {}", backup.display());
    }
}
