use super::{confirm, Invocation};
use crate::cli::{parse_connection, SyncArgs};
use crate::config::{expand_home, ENV_DEFAULT_REMOTE, ENV_LOCAL_PROJECT};
use crate::error::PsyncError;
use crate::models::HostReference;
use crate::ssh_service::DEFAULT_SSH_PORT;
use crate::sync_service::{mirror_dirs, Direction, SyncPlan, SyncRequest};
use anyhow::Result;

pub async fn run(direction: Direction, mut args: SyncArgs, invocation: &Invocation) -> Result<()> {
    let project = invocation.open_project()?;
    let general = &project.config.general;
    let debug = args.debug || general.debug;
    let compress = args.compress || general.compress;
    let cwd = &invocation.cwd;

    // The destination may actually be a file to sync with the default remote
    if let Some(destination) = args.destination.take() {
        if cwd.join(&destination).exists() {
            tracing::debug!("'{}' is a path, using the default remote", destination);
            args.files.insert(0, destination);
        } else {
            args.destination = Some(destination);
        }
    }

    if debug {
        println!("{:#?}", args);
    }

    let host_override = args.host.as_deref().map(parse_connection).transpose()?;
    let replica = match (&args.destination, &host_override, &args.remote) {
        (Some(alias), _, _) => Some(project.config.replica(alias)?),
        (None, Some(_), Some(_)) => None,
        (None, _, _) => Some(project.config.default_remote()?),
    };

    let host_reference: HostReference = match (host_override, replica) {
        (Some(host), _) => host,
        (None, Some(replica)) => replica.host.clone(),
        (None, None) => {
            return Err(PsyncError::MissingPath {
                flag: "host",
                env: ENV_DEFAULT_REMOTE,
            }
            .into())
        }
    };
    let host = host_reference.resolve(&invocation.ssh)?;
    let port = args.port.or(host.port).unwrap_or(DEFAULT_SSH_PORT);

    let remote_root = args
        .remote
        .clone()
        .or_else(|| replica.map(|r| r.path.clone()))
        .ok_or(PsyncError::MissingPath {
            flag: "remote",
            env: ENV_DEFAULT_REMOTE,
        })?;

    let local_root = match &args.local {
        Some(local) => {
            let local = expand_home(&local.to_string_lossy());
            if local.is_absolute() {
                local
            } else {
                cwd.join(local)
            }
        }
        None => project.local_root().map_err(|e| {
            tracing::debug!(error = %e, "Local replica unresolved");
            PsyncError::MissingPath {
                flag: "local",
                env: ENV_LOCAL_PROJECT,
            }
        })?,
    };

    if debug {
        println!("cwd: {}", cwd.display());
        println!("local: {}", local_root.display());
        println!("remote: {}", remote_root);
    }

    let dirs = mirror_dirs(cwd, &local_root, &remote_root)?;
    if debug {
        println!("{} {} {}", dirs.relative.display(), dirs.local, dirs.remote);
    }

    let mut excludes = invocation.settings.default_excludes.clone();
    excludes.extend(args.exclude.iter().cloned());

    let request = SyncRequest {
        direction,
        host: &host,
        port,
        dirs: &dirs,
        files: &args.files,
        excludes: &excludes,
        compress,
        ssh_program: &invocation.settings.ssh_program,
    };
    let plan = SyncPlan::rsync(&invocation.settings.rsync_program, &request);
    tracing::info!(%direction, host = %host, "Prepared transfer");

    if args.confirm || general.ask_confirm || debug {
        println!("{}", plan.command_line());
        if !confirm("Execute? [y/n]")? {
            println!("Exiting.");
            return Ok(());
        }
    }

    if debug {
        println!("Executing the command");
    }
    plan.execute().await?;
    Ok(())
}
