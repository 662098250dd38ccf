//! Filepath: src/infra/walk.rs
//! Gitignore-aware file walking and ignore-rule matching.
//! - `FileWalker` expands selected directories into files, honouring
//!   .gitignore, .git/info/exclude, the global gitignore and extra globs
//! - `IgnoreRules` answers "is this repo-relative path ignored?" for paths
//!   that were selected explicitly and never walked
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{
    DirEntry, WalkBuilder,
    gitignore::{Gitignore, GitignoreBuilder},
};

fn build_globset(patterns: &[String]) -> Result<GlobSet>
{
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns
    {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid ignore glob: {pattern}"))?);
    }

    Ok(builder.build()?)
}

/// Gitignore-aware walker with extra ignore globs.
/// Extra globs are applied in two places:
///   1) Early: prune directories during traversal (filter_entry).
///   2) Late: filter out files that still slipped through.
pub struct FileWalker
{
    /// Compiled set of additional ignore patterns
    ignore_patterns: GlobSet,

    /// Maximum recursion depth; default None (unbounded)
    max_depth: Option<usize>,
}

impl FileWalker
{
    /// Build a walker with additional ignore patterns (e.g., "target/**").
    /// Patterns match on paths relative to the walk root.
    pub fn new(additional_ignores: &[String]) -> Result<Self>
    {
        Ok(Self {
            ignore_patterns: build_globset(additional_ignores)?,
            max_depth: None,
        })
    }

    /// Limit recursion depth (`None` = unbounded).
    pub fn with_max_depth(
        mut self,
        depth: Option<usize>,
    ) -> Self
    {
        self.max_depth = depth;
        self
    }

    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // Dotfiles are part of the tree; only .git is pruned below
        b.hidden(false);

        b.git_ignore(true);
        b.git_global(true);
        b.git_exclude(true);
        // Honour .gitignore even outside an initialised repository
        b.require_git(false);
        b.max_depth(self.max_depth);

        let extra = self
            .ignore_patterns
            .clone();
        let walk_root = root.to_path_buf();
        b.filter_entry(move |ent: &DirEntry| {
            if ent.file_name() == ".git"
            {
                return false;
            }
            let is_dir = ent
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            let rel = ent
                .path()
                .strip_prefix(&walk_root)
                .unwrap_or(ent.path());

            !(is_dir && (extra.is_match(rel) || extra.is_match(rel.join("x"))))
        });

        b
    }

    /// Traverse files under `root`; returns a **sorted** list of paths.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();
        let walker = self
            .build_walk(root_path)
            .build();

        let mut out: Vec<PathBuf> = walker
            .filter_map(|res| match res
            {
                Ok(entry) => Some(entry),
                Err(err) =>
                {
                    tracing::warn!(%err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            .filter(|abs| {
                let rel = abs
                    .strip_prefix(root_path)
                    .unwrap_or(abs);
                !self
                    .ignore_patterns
                    .is_match(rel)
            })
            .collect();

        // Deterministic order (stable CLI & tests)
        out.sort();

        out
    }
}

/// Ignore rules for explicitly selected paths: the repository's root
/// `.gitignore` plus configured globs.
pub struct IgnoreRules
{
    gitignore: Gitignore,
    globs: GlobSet,
}

impl IgnoreRules
{
    pub fn load(
        repo_root: &Path,
        extra: &[String],
    ) -> Result<Self>
    {
        let mut gb = GitignoreBuilder::new(repo_root);
        let gitignore_path = repo_root.join(".gitignore");
        if gitignore_path.exists()
        {
            if let Some(err) = gb.add(&gitignore_path)
            {
                tracing::warn!(%err, "partially parsed .gitignore");
            }
        }
        else
        {
            tracing::debug!(path = %gitignore_path.display(), ".gitignore not found");
        }

        Ok(Self {
            gitignore: gb
                .build()
                .context("build gitignore matcher")?,
            globs: build_globset(extra)?,
        })
    }

    /// Match a repo-relative file path (parents are checked too)
    pub fn is_ignored(
        &self,
        rel: &Path,
    ) -> bool
    {
        if self
            .globs
            .is_match(rel)
        {
            return true;
        }
        self.gitignore
            .matched_path_or_any_parents(rel, false)
            .is_ignore()
    }
}
