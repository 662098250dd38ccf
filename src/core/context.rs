//! Context payload assembly
//!
//! Reads the selected files verbatim and renders them, followed by the
//! instruction, into the single prompt payload sent to the model.
//!
//! - Payload order is the selection order with duplicates removed
//!   (first occurrence wins)
//! - Content is never normalized: tabs, trailing spaces, CRLF and a
//!   missing final newline all survive
//! - Every path must resolve to a regular UTF-8 file under the repository
//!   root; offending paths are collected, not short-circuited

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::cli::{AppContext, ContextArgs};
use crate::core::error::{ContextFailure, PatchError};
use crate::core::session::Workspace;
use crate::infra::config::{ContextConfig, IgnorePolicy};
use crate::infra::io::{ReadTextError, read_text_exact};
use crate::infra::utils::{display_rel, normalize_repo_rel, to_repo_rel};
use crate::infra::walk::{FileWalker, IgnoreRules};

/// One selected file, captured at build time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFile
{
    /// Repo-relative path
    pub path: PathBuf,

    /// Exact file text
    pub content: String,
}

/// Ordered files plus the paths left out in partial mode
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextPayload
{
    pub files: Vec<SelectedFile>,
    pub failures: Vec<ContextFailure>,
}

impl ContextPayload
{
    /// Captured file for a repo-relative path
    pub fn get(
        &self,
        rel: &Path,
    ) -> Option<&SelectedFile>
    {
        self.files
            .iter()
            .find(|f| f.path == rel)
    }

    pub fn is_empty(&self) -> bool
    {
        self.files
            .is_empty()
    }

    /// Render the model payload: every file under a `File:` header in a
    /// fence longer than any backtick run it contains, then the instruction.
    pub fn render(
        &self,
        instruction: &str,
    ) -> String
    {
        let mut out = String::new();

        for file in &self.files
        {
            let fence = "`".repeat(fence_len(&file.content));
            out.push_str(&format!("File: {}\n", display_rel(&file.path)));
            out.push_str(&fence);
            out.push('\n');
            out.push_str(&file.content);
            if !file
                .content
                .is_empty()
                && !file
                    .content
                    .ends_with('\n')
            {
                out.push('\n');
            }
            out.push_str(&fence);
            out.push_str("\n\n");
        }

        if !instruction
            .trim()
            .is_empty()
        {
            out.push_str("Instruction:\n");
            out.push_str(instruction);
            if !instruction.ends_with('\n')
            {
                out.push('\n');
            }
        }

        out
    }
}

/// Backtick count for a fence that cannot be closed by the content
fn fence_len(content: &str) -> usize
{
    let mut longest = 0usize;
    let mut run = 0usize;
    for ch in content.chars()
    {
        if ch == '`'
        {
            run += 1;
            longest = longest.max(run);
        }
        else
        {
            run = 0;
        }
    }
    (longest + 1).max(3)
}

/// Builds payloads for one repository under a fixed ignore configuration.
pub struct ContextBuilder
{
    repo_root: PathBuf,
    rules: IgnoreRules,
    policy: IgnorePolicy,
    partial: bool,
}

impl ContextBuilder
{
    pub fn new(
        repo_root: &Path,
        cfg: &ContextConfig,
    ) -> Result<Self>
    {
        let repo_root = dunce::canonicalize(repo_root).unwrap_or_else(|_| repo_root.to_path_buf());
        let rules = IgnoreRules::load(&repo_root, &cfg.ignore_patterns)?;

        Ok(Self { repo_root, rules, policy: cfg.ignore_policy, partial: cfg.partial })
    }

    /// Record failures on the payload instead of aborting
    pub fn with_partial(
        mut self,
        partial: bool,
    ) -> Self
    {
        self.partial = partial;
        self
    }

    /// Build the payload for repo-relative `paths`, in order.
    #[tracing::instrument(level = "debug", skip_all, fields(selected = paths.len()))]
    pub fn build(
        &self,
        paths: &[PathBuf],
    ) -> Result<ContextPayload, PatchError>
    {
        let mut failures = Vec::new();
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();

        for raw in paths
        {
            let rel = match normalize_repo_rel(raw)
            {
                Ok(rel) => rel,
                Err(e) =>
                {
                    failures.push(ContextFailure { path: raw.clone(), reason: e.to_string() });
                    continue;
                }
            };

            if !seen.insert(rel.clone())
            {
                tracing::debug!(path = %rel.display(), "duplicate selection dropped");
                continue;
            }

            if self
                .rules
                .is_ignored(&rel)
            {
                match self.policy
                {
                    IgnorePolicy::Exclude =>
                    {
                        tracing::info!(path = %rel.display(), "ignored path excluded from context");
                        continue;
                    }
                    IgnorePolicy::ExplicitOverrides =>
                    {
                        tracing::debug!(path = %rel.display(), "explicit selection overrides ignore rule");
                    }
                }
            }

            accepted.push(rel);
        }

        // Reads run in parallel; collect keeps selection order
        let reads: Vec<(PathBuf, Result<String, String>)> = accepted
            .into_par_iter()
            .map(|rel| {
                let res = self.read_inside_root(&rel);
                (rel, res)
            })
            .collect();

        let mut files = Vec::with_capacity(reads.len());
        for (path, res) in reads
        {
            match res
            {
                Ok(content) => files.push(SelectedFile { path, content }),
                Err(reason) => failures.push(ContextFailure { path, reason }),
            }
        }

        if !failures.is_empty()
        {
            if !self.partial
            {
                return Err(PatchError::ContextBuild { failures });
            }
            for f in &failures
            {
                tracing::warn!(path = %f.path.display(), reason = %f.reason, "left out of context");
            }
        }

        tracing::debug!(files = files.len(), failures = failures.len(), "context built");
        Ok(ContextPayload { files, failures })
    }

    fn read_inside_root(
        &self,
        rel: &Path,
    ) -> Result<String, String>
    {
        let abs = self
            .repo_root
            .join(rel);

        // Symlinks may point anywhere; the resolved target must stay inside
        if let Ok(resolved) = dunce::canonicalize(&abs)
            && !resolved.starts_with(&self.repo_root)
        {
            return Err("resolves outside repository root".to_string());
        }

        read_text_exact(&abs).map_err(|e| match e
        {
            ReadTextError::Io(io) => format!("unreadable: {io}"),
            other => other.to_string(),
        })
    }
}

/// Turn user-supplied paths (cwd-relative or absolute) into repo-relative
/// file paths; directories expand to their non-ignored files.
pub fn expand_selection(
    repo_root: &Path,
    inputs: &[PathBuf],
    cfg: &ContextConfig,
) -> Result<Vec<PathBuf>>
{
    let cwd = std::env::current_dir().context("current directory")?;
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);
    let walker = FileWalker::new(&cfg.ignore_patterns)?;

    let mut out = Vec::new();
    for input in inputs
    {
        let abs = if input.is_absolute()
        {
            input.clone()
        }
        else
        {
            cwd.join(input)
        };

        if abs.is_dir()
        {
            for file in walker.walk_files(&abs)
            {
                out.push(to_repo_rel(&file, repo_root)?);
            }
            continue;
        }

        // Missing files still flow through so the builder can report them
        match to_repo_rel(&abs, repo_root)
        {
            Ok(rel) => out.push(rel),
            Err(_) => out.push(input.clone()),
        }
    }

    Ok(out)
}

/// `diffdev context`: print (or copy) the payload for the selection.
pub fn run(
    args: ContextArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let ws = Workspace::open(ctx)?;
    let selection = expand_selection(&ws.root, &args.paths, &ws.config.context)?;

    let builder = ContextBuilder::new(&ws.root, &ws.config.context)?
        .with_partial(args.partial || ws.config.context.partial);
    let payload = builder.build(&selection)?;

    let output = if args.json
    {
        serde_json::to_string_pretty(&payload).context("serialize payload")?
    }
    else
    {
        payload.render(
            args.instruction
                .as_deref()
                .unwrap_or(""),
        )
    };

    if args.clipboard
    {
        match copy_to_clipboard(&output)
        {
            Ok(()) =>
            {
                if !ctx.quiet
                {
                    eprintln!("✓ Copied {} file(s) to clipboard", payload.files.len());
                }
                return Ok(());
            }
            Err(e) => tracing::warn!(error = %e, "clipboard unavailable, printing instead"),
        }
    }

    print!("{output}");
    Ok(())
}

// Clipboard support
pub(crate) fn copy_to_clipboard(s: &str) -> Result<()>
{
    let mut cb = arboard::Clipboard::new().context("clipboard init")?;
    cb.set_text(s.to_string())
        .context("clipboard set")?;
    Ok(())
}
