use crate::error::{PsyncError, Result};
use crate::models::HostDescriptor;
use crate::ssh_service::DEFAULT_SSH_PORT;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// The same subdirectory on both sides of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredDirs {
    pub relative: PathBuf,
    /// Local directory, with a trailing slash.
    pub local: String,
    /// Remote directory, with a trailing slash.
    pub remote: String,
}

/// Reflect `cwd`'s position under `local_root` onto `remote_root`.
///
/// `/p/src` under `/p` mirrored onto `/q` gives `/q/src/`.
pub fn mirror_dirs(cwd: &Path, local_root: &Path, remote_root: &str) -> Result<MirroredDirs> {
    let cwd_real = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    let root_real = local_root
        .canonicalize()
        .unwrap_or_else(|_| local_root.to_path_buf());

    let relative = cwd_real
        .strip_prefix(&root_real)
        .map_err(|_| PsyncError::OutsideLocalRoot {
            cwd: cwd.to_path_buf(),
            root: local_root.to_path_buf(),
        })?
        .to_path_buf();

    let suffix: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    Ok(MirroredDirs {
        local: with_trailing_slash(&root_real.join(&relative).to_string_lossy()),
        remote: with_trailing_slash(&join_remote(remote_root, &suffix)),
        relative,
    })
}

// Remote paths are joined as plain strings, they belong to another machine.
fn join_remote(root: &str, parts: &[String]) -> String {
    let mut joined = root.trim_end_matches('/').to_string();
    for part in parts {
        joined.push('/');
        joined.push_str(part);
    }
    joined
}

fn with_trailing_slash(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// Everything needed to build one rsync invocation.
#[derive(Debug, Clone)]
pub struct SyncRequest<'a> {
    pub direction: Direction,
    /// Filled descriptor of the other side.
    pub host: &'a HostDescriptor,
    pub port: u16,
    pub dirs: &'a MirroredDirs,
    pub files: &'a [String],
    pub excludes: &'a [String],
    pub compress: bool,
    pub ssh_program: &'a str,
}

/// A fully built external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub program: String,
    pub args: Vec<String>,
}

impl SyncPlan {
    pub fn rsync(program: &str, request: &SyncRequest<'_>) -> Self {
        let mut args = Vec::new();

        let compress_flag = if request.compress { "z" } else { "" };
        args.push(format!("-avh{}P", compress_flag));
        args.push("--info=progress2".to_string());

        if request.port != DEFAULT_SSH_PORT {
            args.push("-e".to_string());
            args.push(format!("{} -p {}", request.ssh_program, request.port));
        } else if request.ssh_program != "ssh" {
            args.push("-e".to_string());
            args.push(request.ssh_program.to_string());
        }

        for exclusion in request.excludes {
            args.push("--exclude".to_string());
            args.push(exclusion.clone());
        }

        let local = request.dirs.local.clone();
        let remote = format!("{}:{}", request.host.destination(), request.dirs.remote);
        let (source, target) = match request.direction {
            Direction::Push => (local, remote),
            Direction::Pull => (remote, local),
        };

        if request.files.is_empty() {
            args.push(source);
        } else {
            args.extend(request.files.iter().map(|file| format!("{}{}", source, file)));
        }
        args.push(target);

        Self {
            program: program.to_string(),
            args,
        }
    }

    /// Shell-like rendering, for confirmation prompts and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command with the terminal attached and wait for it.
    ///
    /// There is no timeout, transfers are expected to take a while.
    pub async fn execute(&self) -> Result<()> {
        let command = self.command_line();
        tracing::info!("Executing: {}", command);

        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
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
            tracing::error!("{} finished with a non-zero status: {}", self.program, status);
            return Err(PsyncError::ToolFailed {
                command,
                code: status.code(),
            });
        }

        Ok(())
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=~+,%".contains(c))
    {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs_for(relative: &str) -> MirroredDirs {
        MirroredDirs {
            relative: PathBuf::from(relative),
            local: format!("/p/{}/", relative),
            remote: format!("/q/{}/", relative),
        }
    }

    fn request<'a>(
        direction: Direction,
        host: &'a HostDescriptor,
        dirs: &'a MirroredDirs,
        files: &'a [String],
        excludes: &'a [String],
    ) -> SyncRequest<'a> {
        SyncRequest {
            direction,
            host,
            port: host.port.unwrap_or(22),
            dirs,
            files,
            excludes,
            compress: false,
            ssh_program: "ssh",
        }
    }

    #[test]
    fn test_mirror_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("p");
        let cwd = root.join("src");
        std::fs::create_dir_all(&cwd).unwrap();

        let dirs = mirror_dirs(&cwd, &root, "/q").unwrap();
        assert_eq!(dirs.remote, "/q/src/");
        assert_eq!(dirs.relative, PathBuf::from("src"));
        assert!(dirs.local.ends_with("/p/src/"));
    }

    #[test]
    fn test_mirror_at_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = mirror_dirs(tmp.path(), tmp.path(), "/q/").unwrap();
        assert_eq!(dirs.remote, "/q/");
        assert_eq!(dirs.relative, PathBuf::new());
    }

    #[test]
    fn test_mirror_keeps_remote_tilde() {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&cwd).unwrap();
        let dirs = mirror_dirs(&cwd, tmp.path(), "~/work").unwrap();
        assert_eq!(dirs.remote, "~/work/a/b/");
    }

    #[test]
    fn test_mirror_outside_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("p");
        let elsewhere = tmp.path().join("other");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&elsewhere).unwrap();

        let err = mirror_dirs(&elsewhere, &root, "/q").unwrap_err();
        assert!(matches!(err, PsyncError::OutsideLocalRoot { .. }));
    }

    #[test]
    fn test_push_plan() {
        let host = HostDescriptor::explicit("me", "office.lan", 22);
        let dirs = dirs_for("src");
        let excludes = vec![".git".to_string()];
        let plan = SyncPlan::rsync("rsync", &request(Direction::Push, &host, &dirs, &[], &excludes));

        assert_eq!(
            plan.args,
            vec![
                "-avhP",
                "--info=progress2",
                "--exclude",
                ".git",
                "/p/src/",
                "me@office.lan:/q/src/",
            ]
        );
    }

    #[test]
    fn test_pull_plan_with_port_and_files() {
        let host = HostDescriptor::explicit("me", "office.lan", 2222);
        let dirs = dirs_for("src");
        let files = vec!["a.rs".to_string(), "b.rs".to_string()];
        let mut req = request(Direction::Pull, &host, &dirs, &files, &[]);
        req.compress = true;
        let plan = SyncPlan::rsync("rsync", &req);

        assert_eq!(
            plan.args,
            vec![
                "-avhzP",
                "--info=progress2",
                "-e",
                "ssh -p 2222",
                "me@office.lan:/q/src/a.rs",
                "me@office.lan:/q/src/b.rs",
                "/p/src/",
            ]
        );
        assert_eq!(
            plan.command_line(),
            "rsync -avhzP --info=progress2 -e \"ssh -p 2222\" \
             me@office.lan:/q/src/a.rs me@office.lan:/q/src/b.rs /p/src/"
        );
    }

    #[test]
    fn test_custom_ssh_program() {
        let host = HostDescriptor::explicit("me", "office.lan", 22);
        let dirs = dirs_for("src");
        let mut req = request(Direction::Push, &host, &dirs, &[], &[]);
        req.ssh_program = "/usr/local/bin/ssh";
        let plan = SyncPlan::rsync("rsync", &req);
        assert_eq!(plan.args[2..4], ["-e", "/usr/local/bin/ssh"]);
    }

    #[tokio::test]
    async fn test_execute_reports_missing_program() {
        let plan = SyncPlan {
            program: "/nonexistent/psync-rsync".to_string(),
            args: vec![],
        };
        let err = plan.execute().await.unwrap_err();
        assert!(matches!(err, PsyncError::ToolSpawn { .. }));
    }
}
