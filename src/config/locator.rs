//! Finds the `.psync.yml` governing the current directory.

use super::{EnvDefaults, CONFIG_FILE_NAME};
use std::path::{Path, PathBuf};

/// Locate the project config for `cwd`.
///
/// `PSYNC_LOCAL_PROJECT` pins the lookup to that single directory. Otherwise
/// the nearest ancestor of `cwd` holding a config wins, and the user config
/// directory is the last resort when `search_home` is set.
pub fn locate(env: &EnvDefaults, cwd: &Path, search_home: bool) -> Option<PathBuf> {
    let home_fallback = if search_home {
        dirs::config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    } else {
        None
    };
    locate_from(cwd, env.local_project.as_deref(), home_fallback.as_deref())
}

pub fn locate_from(
    start: &Path,
    pinned_root: Option<&Path>,
    home_fallback: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(root) = pinned_root {
        let candidate = root.join(CONFIG_FILE_NAME);
        tracing::debug!(path = %candidate.display(), "Project root pinned by environment");
        return candidate.is_file().then_some(candidate);
    }

    // `ancestors` ends with the filesystem root itself
    if let Some(found) = start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
    {
        tracing::debug!(path = %found.display(), "Found project config");
        return Some(found);
    }

    home_fallback
        .filter(|fallback| fallback.is_file())
        .map(Path::to_path_buf)
}
