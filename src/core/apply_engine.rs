//! Checkpoint & apply engine
//!
//! `ApplyEngine` is the primitive seam (internal verifier or `git apply`);
//! `PatchEngine` is the state machine on top of it:
//!
//! ```text
//! Idle ──checkpoint──▶ Checkpointed ──apply──▶ Applied ──revert──▶ RolledBack
//!   ▲                        │ failure                                  │
//!   └────────────────────────┘ (prior state kept)            redo ◀─────┘
//! ```
//!
//! `apply` only accepts the `Checkpointed` value returned by `checkpoint`,
//! so nothing reaches the working tree without a stored snapshot.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::core::checkpoint::{CheckpointStatus, CheckpointStore, CheckpointToken};
use crate::core::error::PatchError;
use crate::core::git::{GitEngine, GitOptions};
use crate::core::patch::{FileChangeKind, Patch, apply_file_patch, parse_unified_diff};
use crate::infra::config::EngineKind;
use crate::infra::io::read_text_if_exists;
use crate::infra::utils::{is_git_repo, write_atomic};

/// Patch-application primitive
pub trait ApplyEngine
{
    /// Name recorded in checkpoint manifests
    fn name(&self) -> &'static str;

    /// Dry run; the error message is the diagnostic shown to the user
    fn check(
        &self,
        patch: &Patch,
    ) -> Result<()>;

    /// Write the patch into the working tree
    fn apply(
        &self,
        patch: &Patch,
    ) -> Result<()>;
}

/// In-process primitive: verifies every hunk against the current files,
/// then writes each result atomically. Works without git.
pub struct InternalEngine
{
    repo_root: PathBuf,
}

impl InternalEngine
{
    pub fn new(repo_root: &Path) -> Self
    {
        Self { repo_root: repo_root.to_path_buf() }
    }

    /// New contents for every file, or every reason it cannot apply
    fn plan(
        &self,
        patch: &Patch,
    ) -> Result<Vec<(PathBuf, String)>>
    {
        // The text is the contract; re-parse it rather than trusting structure
        let files = parse_unified_diff(patch.text())?;

        let mut planned = Vec::with_capacity(files.len());
        let mut problems = Vec::new();

        for fp in &files
        {
            let target = self
                .repo_root
                .join(&fp.path);
            let current = match read_text_if_exists(&target)
            {
                Ok(c) => c,
                Err(e) =>
                {
                    problems.push(format!("{}: {e:#}", fp.path));
                    continue;
                }
            };

            let base = match (fp.kind, current)
            {
                (FileChangeKind::Created, Some(_)) =>
                {
                    problems.push(format!("{}: already exists in working directory", fp.path));
                    continue;
                }
                (FileChangeKind::Created, None) => String::new(),
                (FileChangeKind::Modified, Some(c)) => c,
                (FileChangeKind::Modified, None) =>
                {
                    problems.push(format!("{}: No such file or directory", fp.path));
                    continue;
                }
            };

            match apply_file_patch(&base, fp)
            {
                Ok(updated) => planned.push((target, updated)),
                Err(e) => problems.push(format!("{e:#}")),
            }
        }

        if !problems.is_empty()
        {
            bail!("{}", problems.join("\n"));
        }
        Ok(planned)
    }
}

impl ApplyEngine for InternalEngine
{
    fn name(&self) -> &'static str
    {
        "internal"
    }

    fn check(
        &self,
        patch: &Patch,
    ) -> Result<()>
    {
        self.plan(patch)
            .map(|_| ())
    }

    fn apply(
        &self,
        patch: &Patch,
    ) -> Result<()>
    {
        for (target, updated) in self.plan(patch)?
        {
            write_atomic(&target, updated.as_bytes())?;
            tracing::debug!(path = %target.display(), "written");
        }
        Ok(())
    }
}

/// Pick the primitive for `kind`; `auto` uses git inside a work tree
pub fn create_engine(
    kind: EngineKind,
    repo_root: &Path,
    context_lines: usize,
) -> Result<Box<dyn ApplyEngine>>
{
    let git_options = GitOptions { repo_root: repo_root.to_path_buf(), context_lines };

    match kind
    {
        EngineKind::Internal => Ok(Box::new(InternalEngine::new(repo_root))),
        EngineKind::Git => Ok(Box::new(GitEngine::new(git_options)?)),
        EngineKind::Auto =>
        {
            if is_git_repo(repo_root)
            {
                match GitEngine::new(git_options)
                {
                    Ok(git) => return Ok(Box::new(git)),
                    Err(e) => tracing::debug!(error = %e, "git unavailable, using internal engine"),
                }
            }
            Ok(Box::new(InternalEngine::new(repo_root)))
        }
    }
}

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState
{
    Idle,
    Checkpointed,
    Applied,
    RolledBack,
}

enum Slot
{
    Idle,
    Checkpointed
    {
        id: String,
        prior: Box<Slot>,
    },
    Applied
    {
        token: CheckpointToken,
        patch: Patch,
    },
    RolledBack
    {
        patch: Patch,
    },
}

/// Proof that a snapshot exists for `patch`; consumed by [`PatchEngine::apply`].
#[must_use = "a checkpoint does nothing until it is applied"]
#[derive(Debug)]
pub struct Checkpointed
{
    token: CheckpointToken,
    patch: Patch,
}

impl Checkpointed
{
    pub fn id(&self) -> &str
    {
        self.token
            .id()
    }
}

/// The only component that mutates the working tree.
pub struct PatchEngine
{
    store: CheckpointStore,
    primitive: Box<dyn ApplyEngine>,
    slot: Slot,
    force: bool,
}

impl PatchEngine
{
    pub fn new(
        store: CheckpointStore,
        primitive: Box<dyn ApplyEngine>,
    ) -> Self
    {
        Self { store, primitive, slot: Slot::Idle, force: false }
    }

    /// Rebuild from the newest checkpoint still marked applied, so a later
    /// process can revert it.
    pub fn resume(
        store: CheckpointStore,
        primitive: Box<dyn ApplyEngine>,
    ) -> Result<Self>
    {
        let mut engine = Self::new(store, primitive);
        if let Some(token) = engine
            .store
            .latest_applied()?
        {
            let text = engine
                .store
                .patch_text(token.id())?;
            let patch = Patch::from_text(&text)?;
            tracing::debug!(id = token.id(), "resumed applied checkpoint");
            engine.slot = Slot::Applied { token, patch };
        }
        Ok(engine)
    }

    /// Revert even when files changed after the apply
    pub fn with_force(
        mut self,
        force: bool,
    ) -> Self
    {
        self.force = force;
        self
    }

    pub fn engine_name(&self) -> &'static str
    {
        self.primitive
            .name()
    }

    pub fn state(&self) -> EngineState
    {
        match self.slot
        {
            Slot::Idle => EngineState::Idle,
            Slot::Checkpointed { .. } => EngineState::Checkpointed,
            Slot::Applied { .. } => EngineState::Applied,
            Slot::RolledBack { .. } => EngineState::RolledBack,
        }
    }

    /// Patch currently in the tree
    pub fn applied_patch(&self) -> Option<&Patch>
    {
        match &self.slot
        {
            Slot::Applied { patch, .. } => Some(patch),
            _ => None,
        }
    }

    /// Snapshot every file `patch` touches. Fail-closed.
    #[tracing::instrument(level = "debug", skip_all, fields(files = patch.files().len()))]
    pub fn checkpoint(
        &mut self,
        patch: Patch,
    ) -> Result<Checkpointed, PatchError>
    {
        let token = self
            .store
            .create(&patch.paths(), self.primitive.name(), &patch.summary(), patch.text())
            .map_err(|e| PatchError::CheckpointCreationFailed(format!("{e:#}")))?;

        // An abandoned checkpoint hands its prior state on
        let prior = match std::mem::replace(&mut self.slot, Slot::Idle)
        {
            Slot::Checkpointed { prior, .. } => *prior,
            other => other,
        };
        self.slot = Slot::Checkpointed {
            id: token
                .id()
                .to_string(),
            prior: Box::new(prior),
        };

        Ok(Checkpointed { token, patch })
    }

    /// Check, then apply. A failed check leaves the tree untouched; a
    /// failed write restores the checkpoint before reporting.
    #[tracing::instrument(level = "debug", skip_all, fields(id = cp.id()))]
    pub fn apply(
        &mut self,
        cp: Checkpointed,
    ) -> Result<(), PatchError>
    {
        let prior = match std::mem::replace(&mut self.slot, Slot::Idle)
        {
            Slot::Checkpointed { id, prior } if id == cp.token.id() => *prior,
            other =>
            {
                self.slot = other;
                return Err(PatchError::NoCheckpointAvailable);
            }
        };

        if let Err(e) = self
            .primitive
            .check(&cp.patch)
        {
            self.mark(&cp.token, CheckpointStatus::Failed);
            self.slot = prior;
            return Err(PatchError::PatchApplyFailed { diagnostic: format!("{e:#}") });
        }

        if let Err(e) = self
            .primitive
            .apply(&cp.patch)
        {
            tracing::warn!(error = %e, "apply failed after check; restoring checkpoint");
            let restored = self
                .store
                .restore(&cp.token);
            self.mark(&cp.token, CheckpointStatus::Failed);
            self.slot = prior;

            if let Err(re) = restored
            {
                return Err(PatchError::CheckpointRestoreFailed(format!(
                    "{re:#} (after apply error: {e:#})"
                )));
            }
            return Err(PatchError::PatchApplyFailed { diagnostic: format!("{e:#}") });
        }

        self.mark(&cp.token, CheckpointStatus::Applied);
        tracing::info!(id = cp.token.id(), engine = self.primitive.name(), "patch applied");
        self.slot = Slot::Applied { token: cp.token, patch: cp.patch };
        Ok(())
    }

    /// Convenience: checkpoint then apply
    pub fn checkpoint_and_apply(
        &mut self,
        patch: Patch,
    ) -> Result<String, PatchError>
    {
        let cp = self.checkpoint(patch)?;
        let id = cp
            .id()
            .to_string();
        self.apply(cp)?;
        Ok(id)
    }

    /// Restore the applied patch's checkpoint. Only valid in `Applied`.
    pub fn revert(&mut self) -> Result<Vec<PathBuf>, PatchError>
    {
        let Slot::Applied { token, .. } = &self.slot
        else
        {
            return Err(PatchError::NoCheckpointAvailable);
        };

        if !self.force
        {
            let drifted = self
                .store
                .drifted_files(token)
                .map_err(|e| PatchError::CheckpointRestoreFailed(format!("{e:#}")))?;
            if !drifted.is_empty()
            {
                let list = drifted
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(PatchError::CheckpointRestoreFailed(format!(
                    "files changed since the patch was applied: {list} (use --force to revert anyway)"
                )));
            }
        }

        let restored = self
            .store
            .restore(token)
            .map_err(|e| PatchError::CheckpointRestoreFailed(format!("{e:#}")))?;
        self.mark(token, CheckpointStatus::Reverted);

        if let Slot::Applied { patch, .. } = std::mem::replace(&mut self.slot, Slot::Idle)
        {
            self.slot = Slot::RolledBack { patch };
        }
        Ok(restored)
    }

    /// Re-apply the last reverted patch under a fresh checkpoint
    pub fn redo(&mut self) -> Result<(), PatchError>
    {
        let Slot::RolledBack { patch } = &self.slot
        else
        {
            return Err(PatchError::NothingToRedo);
        };
        let patch = patch.clone();
        let cp = self.checkpoint(patch)?;
        self.apply(cp)
    }

    fn mark(
        &self,
        token: &CheckpointToken,
        status: CheckpointStatus,
    )
    {
        if let Err(e) = self
            .store
            .set_status(token, status)
        {
            tracing::warn!(id = token.id(), %status, error = %e, "could not update checkpoint status");
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::core::edit::{EditDocument, EditOperation, FileChangeSet};
    use crate::core::patch::Synthesizer;

    fn write(
        root: &Path,
        rel: &str,
        body: &str,
    )
    {
        fs::write(root.join(rel), body).unwrap();
    }

    fn patch_for(
        root: &Path,
        filename: &str,
        search: &[&str],
        replace: &[&str],
    ) -> Patch
    {
        let doc = EditDocument {
            files: vec![FileChangeSet {
                filename: filename.to_string(),
                changes: vec![EditOperation {
                    search: search
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                    replace: replace
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                }],
            }],
        };
        Synthesizer::new(root)
            .synthesize(&doc)
            .unwrap()
    }

    fn engine(root: &Path) -> PatchEngine
    {
        PatchEngine::new(CheckpointStore::new(root), Box::new(InternalEngine::new(root)))
    }

    #[test]
    fn unwritable_store_fails_before_apply()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.py", "def f():\n    return 1\n");
        // A plain file where the store directory should go
        write(root, ".diffdev", "not a directory");

        let patch = patch_for(root, "a.py", &["    return 1"], &["    return 2"]);
        let mut eng = engine(root);

        match eng.checkpoint_and_apply(patch)
        {
            Err(PatchError::CheckpointCreationFailed(_)) =>
            {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(eng.state(), EngineState::Idle);
        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "def f():\n    return 1\n");
        assert_eq!(fs::read_to_string(root.join(".diffdev")).unwrap(), "not a directory");
    }

    #[test]
    fn apply_then_revert_round_trips()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.py", "def f():\n    return 1\n");

        let mut eng = engine(root);
        assert_eq!(eng.state(), EngineState::Idle);

        let cp = eng
            .checkpoint(patch_for(root, "a.py", &["    return 1"], &["    return 2"]))
            .unwrap();
        assert_eq!(eng.state(), EngineState::Checkpointed);
        eng.apply(cp)
            .unwrap();
        assert_eq!(eng.state(), EngineState::Applied);
        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "def f():\n    return 2\n");

        eng.revert()
            .unwrap();
        assert_eq!(eng.state(), EngineState::RolledBack);
        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "def f():\n    return 1\n");

        // RolledBack behaves as Idle for revert
        assert!(matches!(eng.revert(), Err(PatchError::NoCheckpointAvailable)));
        assert_eq!(eng.state(), EngineState::RolledBack);
    }

    #[test]
    fn revert_without_apply_is_rejected()
    {
        let tmp = TempDir::new().unwrap();
        let mut eng = engine(tmp.path());
        assert!(matches!(eng.revert(), Err(PatchError::NoCheckpointAvailable)));
        assert!(matches!(eng.redo(), Err(PatchError::NothingToRedo)));
        assert_eq!(eng.state(), EngineState::Idle);
    }

    #[test]
    fn failed_check_leaves_tree_and_state()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", "one\n");
        write(root, "b.txt", "two\n");

        let patch_doc = EditDocument {
            files: vec![
                FileChangeSet {
                    filename: "a.txt".into(),
                    changes: vec![EditOperation { search: vec!["one".into()], replace: vec!["1".into()] }],
                },
                FileChangeSet {
                    filename: "b.txt".into(),
                    changes: vec![EditOperation { search: vec!["two".into()], replace: vec!["2".into()] }],
                },
            ],
        };
        let patch = Synthesizer::new(root)
            .synthesize(&patch_doc)
            .unwrap();

        // b.txt drifts between synthesis and apply
        write(root, "b.txt", "changed\n");

        let mut eng = engine(root);
        let cp = eng
            .checkpoint(patch)
            .unwrap();
        let err = eng
            .apply(cp)
            .unwrap_err();
        assert!(matches!(err, PatchError::PatchApplyFailed { .. }));
        assert_eq!(eng.state(), EngineState::Idle);
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "one\n");
        assert_eq!(fs::read_to_string(root.join("b.txt")).unwrap(), "changed\n");
    }

    /// Writes half the patch, then fails
    struct HalfWriter
    {
        inner: InternalEngine,
        root: PathBuf,
    }

    impl ApplyEngine for HalfWriter
    {
        fn name(&self) -> &'static str
        {
            "half"
        }

        fn check(
            &self,
            patch: &Patch,
        ) -> Result<()>
        {
            self.inner
                .check(patch)
        }

        fn apply(
            &self,
            _patch: &Patch,
        ) -> Result<()>
        {
            fs::write(self.root.join("a.txt"), "garbage")?;
            bail!("disk full")
        }
    }

    #[test]
    fn failure_after_check_restores_checkpoint()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", "one\n");

        let primitive = HalfWriter { inner: InternalEngine::new(root), root: root.to_path_buf() };
        let mut eng = PatchEngine::new(CheckpointStore::new(root), Box::new(primitive));
        let cp = eng
            .checkpoint(patch_for(root, "a.txt", &["one"], &["1"]))
            .unwrap();

        match eng.apply(cp)
        {
            Err(PatchError::PatchApplyFailed { diagnostic }) => assert!(diagnostic.contains("disk full")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "one\n");
    }

    #[test]
    fn redo_reapplies_and_new_apply_clears_it()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", "one\n");

        let mut eng = engine(root);
        eng.checkpoint_and_apply(patch_for(root, "a.txt", &["one"], &["1"]))
            .unwrap();
        eng.revert()
            .unwrap();
        eng.redo()
            .unwrap();
        assert_eq!(eng.state(), EngineState::Applied);
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "1\n");

        eng.checkpoint_and_apply(patch_for(root, "a.txt", &["1"], &["uno"]))
            .unwrap();
        eng.revert()
            .unwrap();
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "1\n");
    }

    #[test]
    fn created_files_are_removed_on_revert()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        let mut eng = engine(root);
        eng.checkpoint_and_apply(patch_for(root, "pkg/new.py", &[], &["x = 1"]))
            .unwrap();
        assert_eq!(fs::read_to_string(root.join("pkg/new.py")).unwrap(), "x = 1\n");

        eng.revert()
            .unwrap();
        assert!(!root
            .join("pkg")
            .exists());
    }

    #[test]
    fn resume_allows_revert_in_a_new_engine()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", "one\n");

        engine(root)
            .checkpoint_and_apply(patch_for(root, "a.txt", &["one"], &["1"]))
            .unwrap();

        let mut later = PatchEngine::resume(CheckpointStore::new(root), Box::new(InternalEngine::new(root)))
            .unwrap();
        assert_eq!(later.state(), EngineState::Applied);
        later
            .revert()
            .unwrap();
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "one\n");

        let again = PatchEngine::resume(CheckpointStore::new(root), Box::new(InternalEngine::new(root)))
            .unwrap();
        assert_eq!(again.state(), EngineState::Idle);
    }

    #[test]
    fn revert_refuses_drift_unless_forced()
    {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.txt", "one\n");

        let mut eng = engine(root);
        eng.checkpoint_and_apply(patch_for(root, "a.txt", &["one"], &["1"]))
            .unwrap();
        write(root, "a.txt", "hand edit\n");

        assert!(matches!(eng.revert(), Err(PatchError::CheckpointRestoreFailed(_))));
        assert_eq!(eng.state(), EngineState::Applied);

        let mut eng = eng.with_force(true);
        eng.revert()
            .unwrap();
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "one\n");
    }
}
