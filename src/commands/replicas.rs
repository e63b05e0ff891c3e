use super::{report_backup, Invocation};
use crate::cli::{HostFlags, ReplicasAction};
use crate::config::{Project, ALL_REPLICAS};
use crate::error::PsyncError;
use crate::models::{HostDescriptor, ReplicaConfig};
use crate::ssh_service::{self, KeySetup};
use anyhow::Result;
use serde::Serialize;

pub async fn run(action: ReplicasAction, invocation: &Invocation) -> Result<()> {
    let project = invocation.open_project()?;

    match action {
        ReplicasAction::List { check, json } => list(&project, invocation, check, json).await,
        ReplicasAction::Add {
            alias,
            path,
            host,
            user,
            port,
            hostname,
        } => {
            let flags = HostFlags {
                connection: None,
                host,
                user,
                port,
                hostname,
            };
            add(project, alias, path, flags)
        }
        ReplicasAction::Del { alias } => delete(project, &alias),
        ReplicasAction::Setup { alias } => setup(&project, invocation, &alias).await,
    }
}

#[derive(Debug, Serialize)]
struct ListEntry<'a> {
    alias: &'a str,
    path: &'a str,
    host: Option<HostDescriptor>,
    local: bool,
    default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    online: Option<bool>,
}

async fn list(project: &Project, invocation: &Invocation, check: bool, json: bool) -> Result<()> {
    let config = &project.config;
    let default_alias = config.default_remote().ok().map(|r| r.alias.as_str());
    let mut entries = Vec::with_capacity(config.replicas.len());

    for (alias, replica) in &config.replicas {
        let host = replica.host.resolve(&invocation.ssh);
        if let Err(e) = &host {
            tracing::warn!(alias = %alias, error = %e, "Cannot resolve replica host");
        }
        let online = match (&host, check) {
            (Ok(host), true) => Some(host.is_online(invocation.probe_timeout()).await),
            (Err(_), true) => Some(false),
            _ => None,
        };

        let host_text = match &host {
            Ok(host) => host.to_string(),
            Err(e) => format!("<unresolved: {}>", e),
        };
        let marker = if *alias == config.general.local {
            "    LOCAL"
        } else if Some(alias.as_str()) == default_alias {
            "    DEFAULT"
        } else {
            ""
        };
        let status = match online {
            Some(true) => " [online]",
            Some(false) => " [offline]",
            None => "",
        };

        if !json {
            println!("{} -> {} -> {}{}{}", alias, host_text, replica.path, status, marker);
        }

        entries.push(ListEntry {
            alias,
            path: &replica.path,
            host: host.ok(),
            local: *alias == config.general.local,
            default: Some(alias.as_str()) == default_alias,
            online,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    Ok(())
}

fn add(mut project: Project, alias: String, path: String, flags: HostFlags) -> Result<()> {
    let host = flags.into_reference(std::env::var("USER").ok())?;
    let replica = ReplicaConfig { alias, path, host };

    project.config.add_replica(replica.clone())?;
    println!("Adding {} -> {} to replicas", replica.alias, replica);
    report_backup(project.persist()?);
    Ok(())
}

fn delete(mut project: Project, alias: &str) -> Result<()> {
    let removed = project.config.remove_replica(alias)?;
    for replica in &removed {
        println!("Removed {} -> {}", replica.alias, replica);
    }
    for (field, dangling) in project.config.dangling_references() {
        tracing::warn!("{} still points at removed replica '{}'", field, dangling);
        eprintln!("Warning: {} still points at '{}', which no longer exists", field, dangling);
    }
    report_backup(project.persist()?);
    Ok(())
}

async fn setup(project: &Project, invocation: &Invocation, alias: &str) -> Result<()> {
    let config = &project.config;
    let targets: Vec<&ReplicaConfig> = if alias == ALL_REPLICAS {
        config
            .replicas
            .values()
            .filter(|replica| replica.alias != config.general.local)
            .collect()
    } else {
        vec![config.replica(alias)?]
    };

    if targets.is_empty() {
        return Err(PsyncError::NoRemoteConfigured.into());
    }

    for replica in targets {
        let host = replica.host.resolve(&invocation.ssh)?;
        match ssh_service::install_key(&invocation.settings, &host).await? {
            KeySetup::AlreadyPresent => println!(
                "Alias {} -> {} skipped because the key is already added.",
                replica.alias, host
            ),
            KeySetup::Installed => println!("Key installed on {} -> {}", replica.alias, host),
        }
    }
    Ok(())
}
