use crate::error::{PsyncError, Result};
use crate::models::{GeneralSettings, ProjectConfig, ReplicaConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

mod locator;
mod settings;

pub use locator::locate;
pub use settings::{Settings, SettingsManager};

pub const CONFIG_FILE_NAME: &str = ".psync.yml";

/// Wildcard accepted by `replicas del` and `replicas setup`.
pub const ALL_REPLICAS: &str = "*";

pub const ENV_LOCAL_PROJECT: &str = "PSYNC_LOCAL_PROJECT";
pub const ENV_DEFAULT_REMOTE: &str = "PSYNC_DEFAULT_REMOTE";
pub const ENV_LOCAL_HOST: &str = "PSYNC_LOCAL_HOST";
pub const ENV_ASK_CONFIRM: &str = "PSYNC_ASK_CONFIRM";
pub const ENV_COMPRESS: &str = "PSYNC_COMPRESS";
pub const ENV_DEBUG: &str = "PSYNC_DEBUG";

/// Defaults taken from the environment, read once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    pub local_project: Option<PathBuf>,
    pub local: Option<String>,
    pub remote: Option<String>,
    pub ask_confirm: bool,
    pub compress: bool,
    pub debug: bool,
    /// Boolean variables whose value could not be parsed, as `(name, value)`.
    pub ignored: Vec<(&'static str, String)>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let mut ignored = Vec::new();
        let mut flag = |key: &'static str| match non_empty(key) {
            Some(value) => parse_bool_flag(&value).unwrap_or_else(|| {
                ignored.push((key, value));
                false
            }),
            None => false,
        };
        let ask_confirm = flag(ENV_ASK_CONFIRM);
        let compress = flag(ENV_COMPRESS);
        let debug = flag(ENV_DEBUG);

        Self {
            local_project: non_empty(ENV_LOCAL_PROJECT).map(PathBuf::from),
            local: non_empty(ENV_LOCAL_HOST).or_else(|| non_empty("HOSTNAME")),
            remote: non_empty(ENV_DEFAULT_REMOTE),
            ask_confirm,
            compress,
            debug,
            ignored,
        }
    }

    /// Warn about unparsable variables. Call once logging is set up.
    pub fn warn_ignored(&self) {
        for (key, value) in &self.ignored {
            tracing::warn!("Ignoring {}={:?}, expected a boolean", key, value);
        }
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// What the file may say. Anything missing is filled from `EnvDefaults`.
#[derive(Debug, Deserialize)]
struct RawProjectConfig {
    replicas: Option<BTreeMap<String, ReplicaConfig>>,
    #[serde(default)]
    general: RawGeneralSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeneralSettings {
    local: Option<String>,
    remote: Option<String>,
    ask_confirm: Option<bool>,
    compress: Option<bool>,
    debug: Option<bool>,
}

impl GeneralSettings {
    fn merge(raw: RawGeneralSettings, env: &EnvDefaults, path: &Path) -> Result<Self> {
        let local = raw
            .local
            .or_else(|| env.local.clone())
            .ok_or_else(|| PsyncError::ConfigSchema {
                path: path.to_path_buf(),
                reason: format!("general.local is not set and neither is {}", ENV_LOCAL_HOST),
            })?;

        Ok(Self {
            local,
            remote: raw.remote.or_else(|| env.remote.clone()),
            ask_confirm: raw.ask_confirm.unwrap_or(env.ask_confirm),
            compress: raw.compress.unwrap_or(env.compress),
            debug: raw.debug.unwrap_or(env.debug),
        })
    }

    /// Settings for a fresh project whose local replica is `local`.
    pub fn for_local(local: impl Into<String>, env: &EnvDefaults) -> Self {
        Self {
            local: local.into(),
            remote: env.remote.clone(),
            ask_confirm: env.ask_confirm,
            compress: env.compress,
            debug: env.debug,
        }
    }
}

impl ProjectConfig {
    /// A configuration holding only the local replica.
    pub fn new(local: ReplicaConfig, env: &EnvDefaults) -> Self {
        let general = GeneralSettings::for_local(local.alias.clone(), env);
        let mut replicas = BTreeMap::new();
        replicas.insert(local.alias.clone(), local);
        Self { replicas, general }
    }

    pub fn load(path: &Path, env: &EnvDefaults) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PsyncError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content, path, env)
    }

    /// Parse `content` and merge it over the environment defaults.
    /// `path` is only used for error reporting.
    pub fn from_yaml(content: &str, path: &Path, env: &EnvDefaults) -> Result<Self> {
        let raw: RawProjectConfig =
            serde_yaml_ng::from_str(content).map_err(|e| PsyncError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut replicas = raw.replicas.ok_or_else(|| PsyncError::ConfigSchema {
            path: path.to_path_buf(),
            reason: "missing `replicas`".to_string(),
        })?;
        for (alias, replica) in replicas.iter_mut() {
            replica.alias = alias.clone();
        }

        let general = GeneralSettings::merge(raw.general, env, path)?;
        tracing::debug!(
            path = %path.display(),
            replicas = replicas.len(),
            local = %general.local,
            "Loaded project config"
        );

        Ok(Self { replicas, general })
    }

    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }

    pub fn aliases(&self) -> Vec<String> {
        self.replicas.keys().cloned().collect()
    }

    pub fn replica(&self, alias: &str) -> Result<&ReplicaConfig> {
        self.replicas
            .get(alias)
            .ok_or_else(|| PsyncError::UnknownAlias {
                alias: alias.to_string(),
                known: self.aliases(),
            })
    }

    pub fn local_replica(&self) -> Result<&ReplicaConfig> {
        self.replica(&self.general.local)
    }

    /// The replica `push`/`pull` target when no destination is given.
    ///
    /// An explicit `general.remote` always wins. Otherwise the only non-local
    /// replica is picked; zero or several candidates are errors, never a guess.
    pub fn default_remote(&self) -> Result<&ReplicaConfig> {
        if let Some(remote) = &self.general.remote {
            return self.replica(remote);
        }

        let mut candidates = self
            .replicas
            .values()
            .filter(|replica| replica.alias != self.general.local);

        match (candidates.next(), candidates.count()) {
            (None, _) => Err(PsyncError::NoRemoteConfigured),
            (Some(only), 0) => Ok(only),
            (Some(_), rest) => Err(PsyncError::AmbiguousDefault {
                candidates: rest + 1,
            }),
        }
    }

    /// Insert a new replica. An existing alias is refused and left untouched.
    pub fn add_replica(&mut self, replica: ReplicaConfig) -> Result<()> {
        if let Some(existing) = self.replicas.get(&replica.alias) {
            return Err(PsyncError::DuplicateAlias {
                alias: replica.alias.clone(),
                existing: existing.to_string(),
            });
        }
        self.replicas.insert(replica.alias.clone(), replica);
        Ok(())
    }

    /// Remove one replica, or all of them with `*`. Returns what was removed.
    ///
    /// `general.local` and `general.remote` are not updated; a reference to a
    /// removed alias surfaces as `UnknownAlias` on the next resolution.
    pub fn remove_replica(&mut self, alias: &str) -> Result<Vec<ReplicaConfig>> {
        if alias == ALL_REPLICAS {
            return Ok(std::mem::take(&mut self.replicas).into_values().collect());
        }

        match self.replicas.remove(alias) {
            Some(removed) => Ok(vec![removed]),
            None => Err(PsyncError::UnknownAlias {
                alias: alias.to_string(),
                known: self.aliases(),
            }),
        }
    }

    /// Aliases in `general` that no longer name a replica.
    pub fn dangling_references(&self) -> Vec<(&'static str, &str)> {
        let mut dangling = Vec::new();
        if !self.replicas.contains_key(&self.general.local) {
            dangling.push(("general.local", self.general.local.as_str()));
        }
        if let Some(remote) = self.general.remote.as_deref() {
            if !self.replicas.contains_key(remote) {
                dangling.push(("general.remote", remote));
            }
        }
        dangling
    }

    /// Write the document to `path`, first moving the previous file to
    /// `<name>.bak` when `backup` is set. Returns the backup path.
    ///
    /// Not atomic: a crash between the rename and the write leaves only the
    /// backup behind.
    pub fn persist(&self, path: &Path, backup: bool) -> Result<Option<PathBuf>> {
        let persistence = |source: std::io::Error| PsyncError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let yaml = self
            .to_yaml()
            .map_err(|e| persistence(std::io::Error::other(e)))?;

        let backup_path = if backup && path.exists() {
            let backup_path = backup_path_for(path);
            fs::rename(path, &backup_path).map_err(|e| PsyncError::Persistence {
                path: backup_path.clone(),
                source: e,
            })?;
            tracing::info!("Config backed up at {}", backup_path.display());
            Some(backup_path)
        } else {
            None
        };

        fs::write(path, yaml).map_err(persistence)?;
        tracing::debug!(path = %path.display(), "Config written");
        Ok(backup_path)
    }
}

pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| CONFIG_FILE_NAME.into());
    name.push(".bak");
    path.with_file_name(name)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// A loaded project configuration together with the file it came from.
#[derive(Debug, Clone)]
pub struct Project {
    pub path: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    pub fn load(path: PathBuf, env: &EnvDefaults) -> Result<Self> {
        let config = ProjectConfig::load(&path, env)?;
        Ok(Self { path, config })
    }

    /// Directory holding the config file; relative replica paths start here.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Filesystem root of a replica living on this machine.
    pub fn root_of(&self, replica: &ReplicaConfig) -> PathBuf {
        let path = expand_home(&replica.path);
        if path.is_absolute() {
            path
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn local_root(&self) -> Result<PathBuf> {
        let local = self.config.local_replica()?;
        Ok(self.root_of(local))
    }

    pub fn persist(&self) -> Result<Option<PathBuf>> {
        self.config.persist(&self.path, true)
    }
}
