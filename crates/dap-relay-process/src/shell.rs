//! Adapter executable resolution.

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

use tokio::sync::OnceCell;

/// Resolve an adapter executable for a session.
///
/// The search order is:
/// 1. Absolute paths, used as-is if they name a file.
/// 2. Relative paths, probed under `working_dir` and made absolute.
/// 3. `search_path` (or the process `PATH` when `None`) via `which`.
/// 4. The `PATH` reported by the user's login shell.
pub async fn resolve_executable_path(
    executable: &str,
    working_dir: &Path,
    search_path: Option<&OsStr>,
) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    // The adapter is spawned with `working_dir` as its cwd, so a relative
    // result would be resolved a second time against it.
    let local = working_dir.join(path);
    if local.is_file() {
        return Some(std::path::absolute(&local).unwrap_or(local));
    }

    let search_path = search_path
        .map(OsStr::to_os_string)
        .or_else(|| std::env::var_os("PATH"));
    if let Some(found) = which_in(executable, search_path, working_dir).await {
        return Some(found);
    }

    let login_path = login_shell_path().await?;
    let found = which_in(executable, Some(login_path.clone()), working_dir).await;
    if found.is_some() {
        tracing::debug!(executable, ?login_path, "Resolved via login shell PATH");
    }
    found
}

async fn which_in(executable: &str, paths: Option<OsString>, cwd: &Path) -> Option<PathBuf> {
    let executable = executable.to_string();
    let cwd = cwd.to_path_buf();
    tokio::task::spawn_blocking(move || which::which_in(executable, paths, cwd))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Login-shell `PATH`, computed once per process.
async fn login_shell_path() -> Option<OsString> {
    static LOGIN_PATH: OnceCell<Option<OsString>> = OnceCell::const_new();
    LOGIN_PATH
        .get_or_init(|| async { query_login_shell_path().await.map(OsString::from) })
        .await
        .clone()
}

/// Unix shells we know how to ask for a `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Other(p) => p,
        }
    }

    const fn login(&self) -> bool {
        matches!(self, Self::Zsh(_) | Self::Bash(_))
    }

    fn rc_file(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let rc = match self {
            Self::Zsh(_) => home.join(".zshrc"),
            Self::Bash(_) => home.join(".bashrc"),
            Self::Other(_) => return None,
        };
        rc.is_file().then_some(rc)
    }

    fn print_path_script(&self) -> String {
        let print = "printf '%s' \"$PATH\"";
        self.rc_file()
            .and_then(|rc| shlex::try_quote(rc.to_string_lossy().as_ref()).ok().map(std::borrow::Cow::into_owned))
            .map_or_else(|| print.to_string(), |rc| format!("source {rc}; {print}"))
    }

    fn current() -> Option<Self> {
        let shell = PathBuf::from(std::env::var_os("SHELL")?);
        if !(shell.is_absolute() && shell.is_file()) {
            return None;
        }
        Some(match shell.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(shell),
            Some("bash") => Self::Bash(shell),
            _ => Self::Other(shell),
        })
    }
}

#[cfg(not(windows))]
async fn query_login_shell_path() -> Option<String> {
    use std::{process::Stdio, time::Duration};

    use tokio::process::Command;

    const PATH_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

    let shell = UnixShell::current()?;
    let mut cmd = Command::new(shell.path());
    if shell.login() {
        cmd.arg("-l");
    }
    cmd.arg("-c")
        .arg(shell.print_path_script())
        .env("TERM", "dumb")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = cmd.spawn().ok()?;
    let output = match tokio::time::timeout(PATH_QUERY_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(err)) => {
            tracing::debug!(shell = %shell.path().display(), ?err, "Login shell PATH query failed");
            return None;
        }
        Err(_) => {
            tracing::warn!(shell = %shell.path().display(), "Timed out querying login shell PATH");
            return None;
        }
    };

    let path = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!path.is_empty()).then_some(path)
}

#[cfg(windows)]
async fn query_login_shell_path() -> Option<String> {
    None
}
