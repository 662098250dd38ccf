//! Filesystem helpers shared by the context builder, checkpoint store and
//! apply engine: repository discovery, repo-relative path validation and
//! durable atomic writes.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Discover the repository root.
/// Explicit override wins, then `git rev-parse`, then the nearest ancestor
/// holding `.git` or `.gitignore`, finally `start` itself.
pub fn discover_repo_root(explicit: Option<&Path>, start: &Path) -> PathBuf {
    if let Some(root) = explicit {
        return dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output()
        && output.status.success()
    {
        let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !s.is_empty() {
            let p = PathBuf::from(s);
            return dunce::canonicalize(&p).unwrap_or(p);
        }
    }

    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(".git").exists() || dir.join(".gitignore").exists() {
            return dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        }
        cur = dir.parent();
    }

    dunce::canonicalize(start).unwrap_or_else(|_| start.to_path_buf())
}

/// True when `root` is inside a git work tree
pub fn is_git_repo(root: &Path) -> bool {
    std::process::Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(root)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Normalize a path to a clean repo-relative form; rejects escapes.
pub fn normalize_repo_rel(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        bail!("path must be repo-relative: {}", p.display());
    }
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::ParentDir => {
                if !out.pop() {
                    bail!("path escapes repo: {}", p.display());
                }
            }
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                bail!("path must be repo-relative: {}", p.display())
            }
            Component::Normal(s) => out.push(s),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("empty path");
    }
    Ok(out)
}

/// Turn a user-supplied path (absolute, cwd-relative or repo-relative)
/// into a repo-relative one.
pub fn to_repo_rel(path: &Path, repo_root: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        let abs = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let rel = abs.strip_prefix(repo_root).with_context(|| {
            format!(
                "{} is outside repository {}",
                path.display(),
                repo_root.display()
            )
        })?;
        return normalize_repo_rel(rel);
    }
    normalize_repo_rel(path)
}

/// Repo-relative path rendered with forward slashes (patch headers, payload)
pub fn display_rel(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Atomic write: same-directory temp file, fsync, rename over `path`.
/// Creates missing parent directories; keeps existing permissions.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create parent: {}", dir.display()))?;

    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;

    use std::io::Write;
    let mut file = tmp.as_file();
    file.write_all(data)?;
    file.sync_all()?;

    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms).context("set temp permissions")?;
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace {}", path.display()))?;

    let _ = sync_dir(dir);
    Ok(())
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
pub fn sync_dir(p: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let f = fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_p: &Path) -> std::io::Result<()> {
    // No reliable directory fsync outside unix.
    Ok(())
}
