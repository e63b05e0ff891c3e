use crate::error::{PsyncError, Result};
use crate::models::{HostDescriptor, HostReference};
use crate::ssh_service::DEFAULT_SSH_PORT;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "psync",
    version,
    about = "A glorified rsync which works with default remotes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a .psync.yml in the current directory with this machine as the local replica
    Init(InitArgs),
    /// List and manage the replicas of this project
    Replicas {
        #[command(subcommand)]
        action: ReplicasAction,
    },
    /// Send the current directory to a replica
    Push(SyncArgs),
    /// Fetch the current directory from a replica
    Pull(SyncArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Alias of the local replica
    pub alias: String,
    /// `user@hostname[:port]` or an ssh config host
    pub connection: Option<String>,
    /// Host as configured in ~/.ssh/config
    #[arg(short = 'H', long)]
    pub host: Option<String>,
    #[arg(short, long)]
    pub user: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Hostname or IP address
    #[arg(short = 'i', long = "ip")]
    pub hostname: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ReplicasAction {
    /// Print every replica, marking the local one and the default remote
    List {
        /// Also check whether each host accepts TCP connections
        #[arg(long)]
        check: bool,
        #[arg(long)]
        json: bool,
    },
    /// Register a new replica
    Add {
        alias: String,
        path: String,
        /// Host as configured in ~/.ssh/config
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Remove a replica, or all of them with `*`
    Del { alias: String },
    /// Install the local ssh key on a replica, or on all remote replicas with `*`
    ///
    /// Creates a key first if there is none. Requires the remote password.
    Setup { alias: String },
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Replica to sync with (defaults to the default remote)
    pub destination: Option<String>,
    /// Files that need to be synced
    pub files: Vec<String>,
    /// Remote host, as `user@host` or an ssh config host
    #[arg(short = 'H', long)]
    pub host: Option<String>,
    /// Remote root directory
    #[arg(short, long)]
    pub remote: Option<String>,
    /// Local root directory (defaults to the local replica's path)
    #[arg(short, long)]
    pub local: Option<PathBuf>,
    /// Exclusion patterns provided to rsync
    #[arg(short = 'x', long, num_args = 1..)]
    pub exclude: Vec<String>,
    /// SSH port to use (not needed for hosts configured via ssh config)
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Activates rsync compression (defaults to $PSYNC_COMPRESS)
    #[arg(short, long)]
    pub compress: bool,
    /// Print the rsync command and ask before running it (defaults to $PSYNC_ASK_CONFIRM)
    #[arg(short = 'n', long)]
    pub confirm: bool,
    /// Print the parsed arguments and resolved paths, then ask for confirmation
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn debug_requested(&self) -> bool {
        match &self.command {
            Command::Push(args) | Command::Pull(args) => args.debug,
            _ => false,
        }
    }
}

/// Parse `user@hostname[:port]`; anything without `@` is an ssh config host.
pub fn parse_connection(connection: &str) -> Result<HostReference> {
    let Some((user, rest)) = connection.split_once('@') else {
        return Ok(HostReference::Alias(connection.to_string()));
    };

    let (hostname, port) = match rest.rsplit_once(':') {
        Some((hostname, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                PsyncError::InvalidHost(format!("bad port '{}' in '{}'", port, connection))
            })?;
            (hostname, port)
        }
        None => (rest, DEFAULT_SSH_PORT),
    };

    if user.is_empty() || hostname.is_empty() {
        return Err(PsyncError::InvalidHost(format!(
            "expected user@hostname, got '{}'",
            connection
        )));
    }

    Ok(HostReference::Explicit(HostDescriptor::explicit(
        user, hostname, port,
    )))
}

/// Host flags shared by `init` and `replicas add`.
#[derive(Debug, Clone, Default)]
pub struct HostFlags {
    pub connection: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub hostname: Option<String>,
}

impl HostFlags {
    /// Turn the flags into a host reference.
    ///
    /// An ssh config host may be refined by explicit flags. Without one,
    /// the user defaults to `default_user` and the port to 22.
    pub fn into_reference(self, default_user: Option<String>) -> Result<HostReference> {
        let alias = match (self.host, self.connection) {
            (Some(host), _) => Some(host),
            (None, Some(connection)) => match parse_connection(&connection)? {
                HostReference::Alias(alias) => Some(alias),
                HostReference::Explicit(descriptor) => {
                    return Ok(HostReference::Explicit(HostDescriptor {
                        user: self.user.or(descriptor.user),
                        hostname: self.hostname.or(descriptor.hostname),
                        port: self.port.or(descriptor.port),
                        alias: None,
                    }));
                }
            },
            (None, None) => None,
        };

        let reference = match alias {
            Some(alias) if self.user.is_none() && self.hostname.is_none() && self.port.is_none() => {
                HostReference::Alias(alias)
            }
            Some(alias) => HostReference::Explicit(HostDescriptor {
                alias: Some(alias),
                user: self.user,
                hostname: self.hostname,
                port: self.port,
            }),
            None => HostReference::Explicit(HostDescriptor {
                alias: None,
                user: self.user.or(default_user),
                hostname: self.hostname,
                port: Some(self.port.unwrap_or(DEFAULT_SSH_PORT)),
            }),
        };

        if !reference.descriptor().is_valid() {
            return Err(PsyncError::InvalidHost(
                "pass an ssh config host (--host) or at least a hostname".to_string(),
            ));
        }
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_push_args() {
        let cli = Cli::try_parse_from([
            "psync", "push", "office", "a.rs", "-p", "2222", "-c", "--debug", "-x", "target", "*.log",
        ])
        .unwrap();
        assert!(cli.debug_requested());
        let Command::Push(args) = cli.command else {
            panic!("expected push");
        };
        assert_eq!(args.destination.as_deref(), Some("office"));
        assert_eq!(args.files, vec!["a.rs"]);
        assert_eq!(args.port, Some(2222));
        assert!(args.compress);
        assert_eq!(args.exclude, vec!["target", "*.log"]);
    }

    #[test]
    fn test_parse_replicas_del_all() {
        let cli = Cli::try_parse_from(["psync", "replicas", "del", "*"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Replicas { action: ReplicasAction::Del { ref alias } } if alias == "*"
        ));
    }

    #[test]
    fn test_parse_connection() {
        assert_eq!(
            parse_connection("deploy@10.0.0.5:2222").unwrap(),
            HostReference::Explicit(HostDescriptor::explicit("deploy", "10.0.0.5", 2222))
        );
        assert_eq!(
            parse_connection("deploy@web").unwrap(),
            HostReference::Explicit(HostDescriptor::explicit("deploy", "web", 22))
        );
        assert_eq!(
            parse_connection("workbox").unwrap(),
            HostReference::Alias("workbox".to_string())
        );
        assert!(parse_connection("deploy@web:ssh").is_err());
        assert!(parse_connection("@web").is_err());
    }

    #[test]
    fn test_flags_alias_only() {
        let flags = HostFlags {
            host: Some("box".to_string()),
            ..HostFlags::default()
        };
        assert_eq!(
            flags.into_reference(None).unwrap(),
            HostReference::Alias("box".to_string())
        );
    }

    #[test]
    fn test_flags_alias_with_override() {
        let flags = HostFlags {
            host: Some("box".to_string()),
            user: Some("root".to_string()),
            ..HostFlags::default()
        };
        let reference = flags.into_reference(None).unwrap();
        let descriptor = reference.descriptor();
        assert_eq!(descriptor.alias.as_deref(), Some("box"));
        assert_eq!(descriptor.user.as_deref(), Some("root"));
        assert_eq!(descriptor.port, None);
    }

    #[test]
    fn test_flags_explicit_uses_default_user() {
        let flags = HostFlags {
            hostname: Some("office.lan".to_string()),
            ..HostFlags::default()
        };
        let reference = flags.into_reference(Some("me".to_string())).unwrap();
        assert_eq!(
            reference,
            HostReference::Explicit(HostDescriptor::explicit("me", "office.lan", 22))
        );
    }

    #[test]
    fn test_flags_connection_with_port_flag() {
        let flags = HostFlags {
            connection: Some("me@office.lan".to_string()),
            port: Some(2200),
            ..HostFlags::default()
        };
        assert_eq!(
            flags.into_reference(None).unwrap(),
            HostReference::Explicit(HostDescriptor::explicit("me", "office.lan", 2200))
        );
    }

    #[test]
    fn test_flags_without_hostname_are_invalid() {
        let err = HostFlags::default()
            .into_reference(Some("me".to_string()))
            .unwrap_err();
        assert!(matches!(err, PsyncError::InvalidHost(_)));
    }
}
