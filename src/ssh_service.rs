use crate::config::Settings;
use crate::error::{PsyncError, Result};
use crate::models::{HostDescriptor, HostReference};
use std::process::{Command, Stdio};
use std::time::Duration;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Values the ssh client resolves for a host nickname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshOptions {
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
}

/// Source of resolved ssh client configuration.
pub trait SshConfigLookup {
    fn lookup(&self, alias: &str) -> Result<SshOptions>;
}

/// Queries the local ssh client with `ssh -G <alias>`.
#[derive(Debug, Clone)]
pub struct SshClient {
    program: String,
}

impl SshClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SshConfigLookup for SshClient {
    fn lookup(&self, alias: &str) -> Result<SshOptions> {
        tracing::debug!(alias, program = %self.program, "Resolving ssh host");

        let output = Command::new(&self.program)
            .arg("-G")
            .arg(alias)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PsyncError::HostResolution {
                alias: alias.to_string(),
                reason: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PsyncError::HostResolution {
                alias: alias.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(parse_ssh_g_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse the `key value` lines printed by `ssh -G`.
pub fn parse_ssh_g_output(content: &str) -> SshOptions {
    let mut options = SshOptions::default();

    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.to_lowercase().as_str() {
            "user" => options.user = Some(value.to_string()),
            "hostname" => options.hostname = Some(value.to_string()),
            "port" => options.port = value.parse().ok(),
            _ => {}
        }
    }

    options
}

impl HostDescriptor {
    /// Build a filled descriptor from an ssh config nickname.
    ///
    /// A port the client does not report falls back to 22; a missing user or
    /// hostname is an error.
    pub fn from_alias(lookup: &impl SshConfigLookup, alias: &str) -> Result<Self> {
        let options = lookup.lookup(alias)?;
        let missing = |field: &str| PsyncError::HostResolution {
            alias: alias.to_string(),
            reason: format!("ssh did not report a {}", field),
        };

        Ok(Self {
            alias: Some(alias.to_string()),
            user: Some(options.user.ok_or_else(|| missing("user"))?),
            hostname: Some(options.hostname.ok_or_else(|| missing("hostname"))?),
            port: Some(options.port.unwrap_or(DEFAULT_SSH_PORT)),
        })
    }

    /// Complete the descriptor, returning a new one.
    ///
    /// Fields already set always win over what the ssh client reports, so
    /// filling a filled descriptor is a no-op that does not query anything.
    pub fn fill(&self, lookup: &impl SshConfigLookup) -> Result<Self> {
        let Some(alias) = self.alias.as_deref() else {
            return Ok(Self {
                port: Some(self.port.unwrap_or(DEFAULT_SSH_PORT)),
                ..self.clone()
            });
        };

        if self.is_filled() {
            return Ok(self.clone());
        }

        let resolved = Self::from_alias(lookup, alias)?;
        Ok(Self {
            alias: self.alias.clone(),
            user: self.user.clone().or(resolved.user),
            hostname: self.hostname.clone().or(resolved.hostname),
            port: self.port.or(resolved.port),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.alias.is_some()
            || (self.user.is_some() && self.hostname.is_some() && self.port.is_some())
    }

    pub fn is_filled(&self) -> bool {
        self.user.is_some() && self.hostname.is_some() && self.port.is_some()
    }

    /// `user@hostname`, the target part of an ssh or rsync address.
    pub fn destination(&self) -> String {
        let hostname = self
            .hostname
            .as_deref()
            .or(self.alias.as_deref())
            .unwrap_or_default();
        match &self.user {
            Some(user) => format!("{}@{}", user, hostname),
            None => hostname.to_string(),
        }
    }

    /// Arguments for ssh-style tools: the port flag only when it is not 22.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let port = self.port.unwrap_or(DEFAULT_SSH_PORT);
        if port != DEFAULT_SSH_PORT {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.destination());
        args
    }

    pub fn connection_string(&self) -> String {
        self.ssh_args().join(" ")
    }

    /// Best-effort TCP reachability check. Any failure counts as offline.
    pub async fn is_online(&self, timeout: Duration) -> bool {
        let Some(hostname) = self.hostname.as_deref() else {
            return false;
        };
        let address = (hostname, self.port.unwrap_or(DEFAULT_SSH_PORT));

        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(host = %hostname, error = %e, "Host unreachable");
                false
            }
            Err(_) => {
                tracing::debug!(host = %hostname, ?timeout, "Reachability check timed out");
                false
            }
        }
    }
}

impl HostReference {
    /// Resolve to a filled descriptor.
    ///
    /// An explicit descriptor without an alias must carry both a user and a
    /// hostname; only the port has a default.
    pub fn resolve(&self, lookup: &impl SshConfigLookup) -> Result<HostDescriptor> {
        match self {
            HostReference::Alias(alias) => HostDescriptor::from_alias(lookup, alias),
            HostReference::Explicit(descriptor) => {
                let filled = descriptor.fill(lookup)?;
                if !filled.is_filled() {
                    return Err(PsyncError::InvalidHost(format!(
                        "'{}' needs a user and a hostname, or an ssh config alias",
                        descriptor
                    )));
                }
                Ok(filled)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySetup {
    Installed,
    AlreadyPresent,
}

/// Make sure a local key exists and is installed on `host`.
///
/// A dry run of ssh-copy-id tells which case applies: "No identities found"
/// means there is no local key yet, "All keys were skipped" means the remote
/// already has it.
pub async fn install_key(settings: &Settings, host: &HostDescriptor) -> Result<KeySetup> {
    let dry_run = tokio::process::Command::new(&settings.ssh_copy_id_program)
        .arg("-n")
        .args(host.ssh_args())
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PsyncError::ToolSpawn {
            command: format!("{} -n {}", settings.ssh_copy_id_program, host.connection_string()),
            source: e,
        })?;

    let report = String::from_utf8_lossy(&dry_run.stderr);
    if report.contains("All keys were skipped") {
        return Ok(KeySetup::AlreadyPresent);
    }
    if report.contains("No identities found") {
        generate_key(settings).await?;
    }

    let command = format!("{} {}", settings.ssh_copy_id_program, host.connection_string());
    tracing::info!("Installing key: {}", command);

    // Inherit stdio, ssh-copy-id asks for the remote password
    let status = tokio::process::Command::new(&settings.ssh_copy_id_program)
        .args(host.ssh_args())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| PsyncError::ToolSpawn {
            command: command.clone(),
            source: e,
        })?;

    if !status.success() {
        return Err(PsyncError::ToolFailed {
            command,
            code: status.code(),
        });
    }

    Ok(KeySetup::Installed)
}

/// Create a passphrase-less key at `~/.ssh/id_rsa`.
async fn generate_key(settings: &Settings) -> Result<()> {
    let key_path = dirs::home_dir()
        .ok_or(PsyncError::NoHomeDirectory)?
        .join(".ssh")
        .join("id_rsa");
    let key_path = key_path.to_string_lossy().into_owned();
    let command = format!("{} -q -N \"\" -f {}", settings.ssh_keygen_program, key_path);
    tracing::info!("No local ssh key, generating one: {}", command);

    let status = tokio::process::Command::new(&settings.ssh_keygen_program)
        .args(["-q", "-N", "", "-f", key_path.as_str()])
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| PsyncError::ToolSpawn {
            command: command.clone(),
            source: e,
        })?;

    if !status.success() {
        return Err(PsyncError::ToolFailed {
            command,
            code: status.code(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct StubLookup {
        options: SshOptions,
        calls: Cell<usize>,
    }

    impl StubLookup {
        fn new(user: &str, hostname: &str, port: Option<u16>) -> Self {
            Self {
                options: SshOptions {
                    user: Some(user.to_string()),
                    hostname: Some(hostname.to_string()),
                    port,
                },
                calls: Cell::new(0),
            }
        }
    }

    impl SshConfigLookup for StubLookup {
        fn lookup(&self, _alias: &str) -> Result<SshOptions> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.options.clone())
        }
    }

    struct FailingLookup;

    impl SshConfigLookup for FailingLookup {
        fn lookup(&self, alias: &str) -> Result<SshOptions> {
            Err(PsyncError::HostResolution {
                alias: alias.to_string(),
                reason: "unknown host".to_string(),
            })
        }
    }

    #[test]
    fn test_fill_partial_alias() {
        let lookup = StubLookup::new("u", "h", Some(2200));
        let filled = HostDescriptor::from_alias_only("box").fill(&lookup).unwrap();
        assert_eq!(
            filled,
            HostDescriptor {
                alias: Some("box".to_string()),
                user: Some("u".to_string()),
                hostname: Some("h".to_string()),
                port: Some(2200),
            }
        );
    }

    #[test]
    fn test_fill_is_idempotent() {
        let lookup = StubLookup::new("u", "h", Some(2200));
        let once = HostDescriptor::from_alias_only("box").fill(&lookup).unwrap();
        let twice = once.fill(&lookup).unwrap();
        assert_eq!(once, twice);
        assert_eq!(lookup.calls.get(), 1);
    }

    #[test]
    fn test_fill_keeps_explicit_fields() {
        let lookup = StubLookup::new("u", "h", Some(2200));
        let partial = HostDescriptor {
            alias: Some("box".to_string()),
            user: Some("deploy".to_string()),
            ..HostDescriptor::default()
        };
        let filled = partial.fill(&lookup).unwrap();
        assert_eq!(filled.user.as_deref(), Some("deploy"));
        assert_eq!(filled.hostname.as_deref(), Some("h"));
        // original untouched
        assert_eq!(partial.hostname, None);
    }

    #[test]
    fn test_fill_without_alias_defaults_port() {
        let partial = HostDescriptor {
            alias: None,
            user: Some("me".to_string()),
            hostname: Some("example.org".to_string()),
            port: None,
        };
        let filled = partial.fill(&FailingLookup).unwrap();
        assert_eq!(filled.port, Some(22));
        assert_eq!(filled.user.as_deref(), Some("me"));
    }

    #[test]
    fn test_resolve_rejects_explicit_host_without_hostname() {
        let reference: HostReference = serde_yaml_ng::from_str("user: me\n").unwrap();
        let err = reference.resolve(&FailingLookup).unwrap_err();
        assert!(matches!(err, PsyncError::InvalidHost(_)));
        assert!(err.to_string().contains("hostname"));
    }

    #[test]
    fn test_resolve_rejects_explicit_host_without_user() {
        let reference = HostReference::Explicit(HostDescriptor {
            hostname: Some("example.org".to_string()),
            ..HostDescriptor::default()
        });
        let err = reference.resolve(&FailingLookup).unwrap_err();
        assert!(matches!(err, PsyncError::InvalidHost(_)));
    }

    #[test]
    fn test_resolve_explicit_host_defaults_port() {
        let reference: HostReference =
            serde_yaml_ng::from_str("user: me\nhostname: example.org\n").unwrap();
        let host = reference.resolve(&FailingLookup).unwrap();
        assert_eq!(host.port, Some(22));
        assert_eq!(host.destination(), "me@example.org");
    }

    #[test]
    fn test_from_alias_port_falls_back_to_22() {
        let lookup = StubLookup::new("u", "h", None);
        let host = HostDescriptor::from_alias(&lookup, "box").unwrap();
        assert_eq!(host.port, Some(22));
    }

    #[test]
    fn test_from_alias_propagates_lookup_failure() {
        let err = HostDescriptor::from_alias(&FailingLookup, "ghost").unwrap_err();
        assert!(matches!(err, PsyncError::HostResolution { ref alias, .. } if alias == "ghost"));
    }

    #[test]
    fn test_from_alias_requires_hostname() {
        struct NoHostname;
        impl SshConfigLookup for NoHostname {
            fn lookup(&self, _alias: &str) -> Result<SshOptions> {
                Ok(SshOptions {
                    user: Some("u".to_string()),
                    ..SshOptions::default()
                })
            }
        }
        let err = HostDescriptor::from_alias(&NoHostname, "box").unwrap_err();
        assert!(err.to_string().contains("hostname"));
    }

    #[test]
    fn test_is_valid() {
        assert!(HostDescriptor::from_alias_only("box").is_valid());
        assert!(HostDescriptor::explicit("u", "h", 22).is_valid());
        let missing_port = HostDescriptor {
            user: Some("u".to_string()),
            hostname: Some("h".to_string()),
            ..HostDescriptor::default()
        };
        assert!(!missing_port.is_valid());
        assert!(!HostDescriptor::default().is_valid());
    }

    #[test]
    fn test_connection_string() {
        let host = HostDescriptor::explicit("deploy", "10.0.0.1", 2222);
        assert_eq!(host.ssh_args(), vec!["-p", "2222", "deploy@10.0.0.1"]);
        assert_eq!(host.connection_string(), "-p 2222 deploy@10.0.0.1");

        let default_port = HostDescriptor::explicit("deploy", "10.0.0.1", 22);
        assert_eq!(default_port.connection_string(), "deploy@10.0.0.1");
    }

    #[test]
    fn test_resolve_alias_reference() {
        let lookup = StubLookup::new("u", "h", Some(22));
        let host = HostReference::Alias("A".to_string()).resolve(&lookup).unwrap();
        assert_eq!(host.alias.as_deref(), Some("A"));
        assert_eq!(host.destination(), "u@h");
    }

    #[test]
    fn test_parse_ssh_g_output() {
        let output = "\
user deploy
hostname build.internal
port 2222
identityfile ~/.ssh/id_ed25519
";
        let options = parse_ssh_g_output(output);
        assert_eq!(options.user.as_deref(), Some("deploy"));
        assert_eq!(options.hostname.as_deref(), Some("build.internal"));
        assert_eq!(options.port, Some(2222));
    }

    #[test]
    fn test_parse_ssh_g_output_bad_port() {
        let options = parse_ssh_g_output("hostname h\nport nope\n");
        assert_eq!(options.port, None);
        assert_eq!(options.user, None);
    }

    #[tokio::test]
    async fn test_is_online_with_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = HostDescriptor::explicit("u", "127.0.0.1", port);
        assert!(host.is_online(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_is_online_without_hostname() {
        let host = HostDescriptor::from_alias_only("box");
        assert!(!host.is_online(Duration::from_millis(100)).await);
    }
}
