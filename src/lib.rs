//! **diffdev** - select files, describe a change, get a reviewable patch
//!
//! The model answers with search/replace edits; they are matched exactly
//! against the selected files, turned into a unified diff, and applied behind
//! a checkpoint that `revert` (or `undo` in a session) restores.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Patch lifecycle: context, parse, synthesize, checkpoint and apply
pub mod core {
    /// Error taxonomy and exit codes
    pub mod error;
    pub use error::PatchError;

    /// Exact, ordered file payloads for the model
    pub mod context;
    pub use context::{ContextBuilder, ContextPayload, SelectedFile};

    /// Edit document extraction and strict decoding
    pub mod edit;
    pub use edit::{EditDocument, EditOperation, FileChangeSet, parse_edit_document};

    /// Search/replace to unified diff
    pub mod patch;
    pub use patch::{Patch, Synthesizer};

    /// On-disk snapshots under `.diffdev/checkpoints`
    pub mod checkpoint;
    pub use checkpoint::CheckpointStore;

    /// `git apply` primitive
    pub mod git;

    /// Apply primitives and the checkpointed state machine
    pub mod apply_engine;
    pub use apply_engine::{ApplyEngine, PatchEngine, create_engine};

    /// Messages API client
    pub mod model;
    pub use model::{AnthropicClient, ModelClient};

    /// Directory dump for `copydir`
    pub mod tree;

    /// Command handlers and the interactive loop
    pub mod session;
}

/// Infrastructure - Configuration, I/O, and utilities
pub mod infra {
    /// Layered configuration and credentials
    pub mod config;
    pub use config::{Config, load_config};

    /// Exact UTF-8 reads, memory-mapped above 1 MiB
    pub mod io;

    /// Gitignore-aware walking and ignore rules for explicit selections
    pub mod walk;
    pub use walk::FileWalker;

    /// Repository paths and atomic writes
    pub mod utils;
}

pub use cli::{AppContext, Cli, Commands};
pub use self::core::{ContextBuilder, EditDocument, Patch, PatchEngine, PatchError, Synthesizer};
pub use infra::{Config, load_config};
