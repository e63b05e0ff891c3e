use super::Invocation;
use crate::cli::{HostFlags, InitArgs};
use crate::config::{self, CONFIG_FILE_NAME, ENV_LOCAL_PROJECT};
use crate::error::PsyncError;
use crate::models::{ProjectConfig, ReplicaConfig};
use anyhow::Result;
use std::path::Path;

pub fn run(args: InitArgs, invocation: &Invocation) -> Result<()> {
    let path = invocation.cwd.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(PsyncError::AlreadyInitialized { path }.into());
    }
    if let Some(existing) = config::locate(&invocation.env, &invocation.cwd, false) {
        return Err(PsyncError::AlreadyInitialized { path: existing }.into());
    }
    // A config written here would never be found while the pin points elsewhere.
    if let Some(pinned) = &invocation.env.local_project {
        if !same_dir(pinned, &invocation.cwd) {
            return Err(PsyncError::PinnedElsewhere {
                env: ENV_LOCAL_PROJECT,
                pinned: pinned.clone(),
            }
            .into());
        }
    }

    let host = HostFlags {
        connection: args.connection,
        host: args.host,
        user: args.user,
        port: args.port,
        hostname: args.hostname,
    }
    .into_reference(std::env::var("USER").ok())?;

    let local = ReplicaConfig {
        alias: args.alias,
        path: invocation.cwd.to_string_lossy().into_owned(),
        host,
    };
    tracing::info!(alias = %local.alias, path = %local.path, "Initializing project");

    let project = ProjectConfig::new(local, &invocation.env);
    project.persist(&path, false)?;

    println!("Created {} with local replica '{}'", path.display(), project.general.local);
    Ok(())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
