//! Error taxonomy for the patch lifecycle
//!
//! Every variant aborts the current cycle only. None of them may leave the
//! working tree partially patched; the apply engine restores its checkpoint
//! before surfacing a failure that happened after the dry-run check.

use std::path::PathBuf;

/// Domain errors raised by the context builder, parser, synthesizer and
/// apply engine.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// One or more selected files could not be read
    #[error("context build failed: {}", render_failures(.failures))]
    ContextBuild { failures: Vec<ContextFailure> },

    /// Model output did not contain a valid edit document
    #[error("malformed edit document: {reason}")]
    MalformedEditDocument { reason: String, raw: String },

    /// A search block has no exact occurrence in the working text
    #[error("search block not found in {filename}:\n{}", render_block(.block))]
    SearchBlockNotFound { filename: String, block: Vec<String> },

    /// A search block occurs more than once in the working text
    #[error(
        "search block matches {occurrences} times in {filename} (must be unique):\n{}",
        render_block(.block)
    )]
    AmbiguousSearchBlock {
        filename: String,
        block: Vec<String>,
        occurrences: usize,
    },

    /// Empty search against a file that already has content
    #[error("empty search block for non-empty file {filename}; include the lines to replace")]
    EmptySearchBlock { filename: String },

    /// Snapshot could not be captured; nothing was applied
    #[error("checkpoint creation failed: {0}")]
    CheckpointCreationFailed(String),

    /// Snapshot could not be written back
    #[error("checkpoint restore failed: {0}")]
    CheckpointRestoreFailed(String),

    /// The primitive rejected the patch; the working tree is unchanged
    #[error("patch apply failed (working tree unchanged):\n{diagnostic}")]
    PatchApplyFailed { diagnostic: String },

    /// Revert requested with nothing applied
    #[error("no checkpoint available to revert")]
    NoCheckpointAvailable,

    /// Redo requested without a reverted patch to re-apply
    #[error("nothing to redo")]
    NothingToRedo,

    /// The model did not answer within the configured timeout
    #[error("model request timed out after {secs}s")]
    ModelTimeout { secs: u64 },

    /// Transport or API failure while talking to the model
    #[error("model request failed: {0}")]
    ModelRequestFailed(String),

    /// Credential missing from the environment
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
}

/// Why a single selected path was left out of the payload
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContextFailure {
    pub path: PathBuf,
    pub reason: String,
}

fn render_failures(failures: &[ContextFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.path.display(), f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_block(block: &[String]) -> String {
    block
        .iter()
        .map(|l| format!("  | {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PatchError {
    /// Stable exit code per failure class
    /// 2=conflict, 3=invalid input, 4=repo/checkpoint, 5=internal/model
    pub fn exit_code(&self) -> i32 {
        match self {
            PatchError::SearchBlockNotFound { .. }
            | PatchError::AmbiguousSearchBlock { .. }
            | PatchError::EmptySearchBlock { .. }
            | PatchError::PatchApplyFailed { .. } => 2,
            PatchError::ContextBuild { .. } | PatchError::MalformedEditDocument { .. } => 3,
            PatchError::CheckpointCreationFailed(_)
            | PatchError::CheckpointRestoreFailed(_)
            | PatchError::NoCheckpointAvailable
            | PatchError::NothingToRedo => 4,
            PatchError::ModelTimeout { .. }
            | PatchError::ModelRequestFailed(_)
            | PatchError::MissingCredential(_) => 5,
        }
    }
}

/// Exit code for any error bubbling out of a command handler
pub fn exit_code_for(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<PatchError>() {
        Some(pe) => pe.exit_code(),
        None => 5,
    }
}
