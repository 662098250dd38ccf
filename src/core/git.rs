//! `git apply` integration
//!
//! Feeds the rendered patch through stdin, working tree only (no index),
//! and maps stderr into structured conflicts with a remedy per class.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::apply_engine::ApplyEngine;
use crate::core::patch::Patch;

/// Git apply configuration
#[derive(Debug, Clone)]
pub struct GitOptions {
    pub repo_root: PathBuf,
    pub context_lines: usize,
}

/// Git conflict types with user-friendly categorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitConflict {
    PreimageMismatch {
        path: PathBuf,
        line: Option<u32>,
        hint: &'static str,
    },
    AlreadyExists {
        path: PathBuf,
        hint: &'static str,
    },
    MissingFile {
        path: PathBuf,
        hint: &'static str,
    },
    PathOutsideRepo {
        path: PathBuf,
        hint: &'static str,
    },
    Other(String),
}

/// Git apply outcome
#[derive(Debug)]
pub struct GitOutcome {
    pub success: bool,
    pub conflicts: Vec<GitConflict>,
    pub stderr_raw: String,
}

/// `git apply` primitive
pub struct GitEngine {
    options: GitOptions,
    /// Subdirectory of the work tree the repo root maps to (`--directory`)
    prefix: Option<String>,
}

impl GitEngine {
    pub fn new(options: GitOptions) -> Result<Self> {
        detect_git_executable()?;
        let prefix = show_prefix(&options.repo_root);
        Ok(Self { options, prefix })
    }

    fn run_git_apply(&self, patch_content: &str, check_only: bool) -> Result<GitOutcome> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.options.repo_root);
        cmd.args(["-c", "apply.whitespace=nowarn", "apply"]);

        if check_only {
            cmd.arg("--check");
        }
        if self.options.context_lines == 0 {
            cmd.arg("--unidiff-zero");
        }
        if let Some(prefix) = &self.prefix {
            cmd.arg(format!("--directory={prefix}"));
        }
        cmd.arg("--verbose");
        cmd.arg("-");

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(check_only, root = %self.options.repo_root.display(), "running git apply");
        let mut child = cmd.spawn().context("Failed to spawn git apply process")?;

        if let Some(mut stdin) = child.stdin.take() {
            use std::io::Write;
            stdin
                .write_all(patch_content.as_bytes())
                .context("Failed to write patch to git apply stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to wait for git apply process")?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Ok(GitOutcome {
            success: output.status.success(),
            conflicts: parse_git_stderr(&stderr),
            stderr_raw: stderr,
        })
    }

    fn run_checked(&self, patch: &Patch, check_only: bool) -> Result<()> {
        let outcome = self.run_git_apply(patch.text(), check_only)?;
        if outcome.success {
            return Ok(());
        }

        let mut diagnostic = render_conflict_summary(&outcome.conflicts);
        if diagnostic.is_empty() {
            diagnostic = outcome.stderr_raw.trim().to_string();
        }
        bail!("{diagnostic}")
    }
}

impl ApplyEngine for GitEngine {
    fn name(&self) -> &'static str {
        "git"
    }

    fn check(&self, patch: &Patch) -> Result<()> {
        self.run_checked(patch, true)
    }

    fn apply(&self, patch: &Patch) -> Result<()> {
        self.run_checked(patch, false)
    }
}

/// Verify a usable git is on PATH
pub fn detect_git_executable() -> Result<()> {
    let output = Command::new("git")
        .arg("--version")
        .output()
        .context("Git executable not found in PATH")?;

    if !output.status.success() {
        bail!("Git command failed");
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    if !version_str.contains("git version") {
        bail!("Unexpected git version output: {}", version_str);
    }

    Ok(())
}

fn show_prefix(root: &Path) -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--show-prefix"])
        .current_dir(root)
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let prefix = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!prefix.is_empty()).then_some(prefix)
}

/// Parse git apply stderr into structured conflicts
fn parse_git_stderr(stderr: &str) -> Vec<GitConflict> {
    let mut conflicts = Vec::new();

    for line in stderr.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("error: patch failed: ") {
            let (path, at) = rest.rsplit_once(':').unwrap_or((rest, ""));
            conflicts.push(GitConflict::PreimageMismatch {
                path: PathBuf::from(path),
                line: at.parse().ok(),
                hint: "File changed since the patch was generated. Re-run the prompt.",
            });
            continue;
        }

        let Some(rest) = line
            .strip_prefix("error: ")
            .or_else(|| line.strip_prefix("fatal: "))
        else {
            continue;
        };

        let Some((path, msg)) = rest.rsplit_once(": ") else {
            conflicts.push(GitConflict::Other(line.to_string()));
            continue;
        };
        let path = PathBuf::from(path);

        match msg {
            // Already reported with a line number by "patch failed"
            "patch does not apply" => {
                if !conflicts.iter().any(
                    |c| matches!(c, GitConflict::PreimageMismatch { path: p, .. } if *p == path),
                ) {
                    conflicts.push(GitConflict::PreimageMismatch {
                        path,
                        line: None,
                        hint: "File changed since the patch was generated. Re-run the prompt.",
                    });
                }
            }
            "already exists in working directory" => conflicts.push(GitConflict::AlreadyExists {
                path,
                hint: "Patch creates a file that already exists. Include it in the context.",
            }),
            "No such file or directory" => conflicts.push(GitConflict::MissingFile {
                path,
                hint: "Patch edits a file that is missing from the working tree.",
            }),
            m if m.contains("outside repository") || m.contains("beyond a symbolic link") => {
                conflicts.push(GitConflict::PathOutsideRepo {
                    path,
                    hint: "Edits must target files within the repository root.",
                })
            }
            _ => conflicts.push(GitConflict::Other(line.to_string())),
        }
    }

    conflicts
}

/// Render user-friendly conflict summary
pub fn render_conflict_summary(conflicts: &[GitConflict]) -> String {
    if conflicts.is_empty() {
        return String::new();
    }

    let mut output = format!("Conflicts ({})\n", conflicts.len());

    for conflict in conflicts.iter() {
        match conflict {
            GitConflict::PreimageMismatch { path, line, hint } => {
                let at = line.map(|l| format!(":{l}")).unwrap_or_default();
                output.push_str(&format!(
                    "  • {}{}: preimage mismatch\n    Remedy: {}\n",
                    path.display(),
                    at,
                    hint
                ));
            }
            GitConflict::AlreadyExists { path, hint } => {
                output.push_str(&format!(
                    "  • {}: already exists\n    Remedy: {}\n",
                    path.display(),
                    hint
                ));
            }
            GitConflict::MissingFile { path, hint } => {
                output.push_str(&format!(
                    "  • {}: missing\n    Remedy: {}\n",
                    path.display(),
                    hint
                ));
            }
            GitConflict::PathOutsideRepo { path, hint } => {
                output.push_str(&format!(
                    "  • {}: outside repository\n    Remedy: {}\n",
                    path.display(),
                    hint
                ));
            }
            GitConflict::Other(msg) => {
                output.push_str(&format!("  • {}\n", msg));
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_parsing() {
        let stderr = r#"
Checking patch src/main.rs...
error: patch failed: src/main.rs:10
error: src/main.rs: patch does not apply
error: docs/new.md: already exists in working directory
"#;

        let conflicts = parse_git_stderr(stderr);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(
            conflicts[0],
            GitConflict::PreimageMismatch {
                path: PathBuf::from("src/main.rs"),
                line: Some(10),
                hint: "File changed since the patch was generated. Re-run the prompt.",
            }
        );
        assert!(matches!(conflicts[1], GitConflict::AlreadyExists { .. }));
    }

    #[test]
    fn unknown_errors_are_kept_verbatim() {
        let conflicts = parse_git_stderr("fatal: corrupt patch at line 7\n");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0],
            GitConflict::Other("fatal: corrupt patch at line 7".to_string())
        );
    }

    #[test]
    fn test_conflict_summary_rendering() {
        let conflicts = vec![
            GitConflict::PreimageMismatch {
                path: PathBuf::from("src/main.rs"),
                line: Some(10),
                hint: "Try regenerating",
            },
            GitConflict::MissingFile {
                path: PathBuf::from("src/lib.rs"),
                hint: "Include it",
            },
        ];

        let summary = render_conflict_summary(&conflicts);
        assert!(summary.contains("Conflicts (2)"));
        assert!(summary.contains("src/main.rs:10: preimage mismatch"));
        assert!(summary.contains("src/lib.rs: missing"));
    }
}
