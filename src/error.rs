use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = PsyncError> = std::result::Result<T, E>;

/// How the command boundary should report an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Nothing went wrong, there is just nothing to do.
    Notice,
    /// The operation was refused; a single line tells the user why.
    Refusal,
    /// Something failed underneath the operation.
    Fatal,
}

#[derive(Error, Debug)]
pub enum PsyncError {
    #[error("Failed to parse config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {reason}", path.display())]
    ConfigSchema { path: PathBuf, reason: String },

    #[error("'{alias}' not among valid replicas: {}", known.join(", "))]
    UnknownAlias { alias: String, known: Vec<String> },

    #[error("Replica '{alias}' exists already -> {existing}")]
    DuplicateAlias { alias: String, existing: String },

    #[error(
        "Cannot choose a default remote: general.remote is not set and {candidates} replicas qualify. \
         Set general.remote (or PSYNC_DEFAULT_REMOTE) or pass a destination explicitly"
    )]
    AmbiguousDefault { candidates: usize },

    #[error("No remote replica configured, add one with `psync replicas add`")]
    NoRemoteConfigured,

    #[error("Cannot resolve SSH host '{alias}': {reason}")]
    HostResolution { alias: String, reason: String },

    #[error("Failed to persist config at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No .psync.yml found, run `psync init` first")]
    NoConfigFound,

    #[error("A config already governs this location: {}", path.display())]
    AlreadyInitialized { path: PathBuf },

    #[error(
        "{env} pins the project to {}, run `psync init` from there or unset it",
        pinned.display()
    )]
    PinnedElsewhere { env: &'static str, pinned: PathBuf },

    #[error("Cannot determine the home directory")]
    NoHomeDirectory,

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Current directory {} is not inside the local replica root {}", cwd.display(), root.display())]
    OutsideLocalRoot { cwd: PathBuf, root: PathBuf },

    #[error("You must specify --{flag} or set {env}")]
    MissingPath { flag: &'static str, env: &'static str },

    #[error("Failed to execute `{command}`: {source}")]
    ToolSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed with exit code {}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ToolFailed { command: String, code: Option<i32> },
}

impl PsyncError {
    pub fn severity(&self) -> Severity {
        match self {
            PsyncError::NoRemoteConfigured => Severity::Notice,
            PsyncError::UnknownAlias { .. }
            | PsyncError::DuplicateAlias { .. }
            | PsyncError::AmbiguousDefault { .. }
            | PsyncError::NoConfigFound
            | PsyncError::AlreadyInitialized { .. }
            | PsyncError::PinnedElsewhere { .. }
            | PsyncError::InvalidHost(_)
            | PsyncError::OutsideLocalRoot { .. }
            | PsyncError::MissingPath { .. } => Severity::Refusal,
            PsyncError::ConfigParse { .. }
            | PsyncError::ConfigRead { .. }
            | PsyncError::ConfigSchema { .. }
            | PsyncError::HostResolution { .. }
            | PsyncError::Persistence { .. }
            | PsyncError::NoHomeDirectory
            | PsyncError::ToolSpawn { .. }
            | PsyncError::ToolFailed { .. } => Severity::Fatal,
        }
    }

    /// Process exit code for this error.
    ///
    /// A failed external tool hands its own code through so scripts can tell
    /// an rsync failure apart from a psync one.
    pub fn exit_code(&self) -> i32 {
        match self {
            PsyncError::NoRemoteConfigured => 0,
            PsyncError::ToolFailed { code: Some(code), .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}
