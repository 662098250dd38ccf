use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::infra::config::EngineKind;

/// Shared application context for global flags
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub verbose: bool,  // global --verbose
    /// Explicit repository root; discovered from cwd when `None`
    pub repo_root: Option<PathBuf>,
    /// Overrides `[apply] engine` from the config file
    pub engine: Option<EngineKind>,
}

#[derive(Parser)]
#[command(name = "diffdev")]
#[command(
    about = "Select files, describe a change, and apply the model's edits as a reviewable, revertible patch"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Debug logging on stderr (overridden by DIFFDEV_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository root (auto-detected if not specified)
    #[arg(long, global = true)]
    pub repo_root: Option<PathBuf>,

    /// Apply engine: internal (in-process), git (git apply), auto (git inside a repository)
    #[arg(long, global = true, value_enum)]
    pub engine: Option<EngineKind>,
}

impl Cli {
    /// Build the context passed to every handler
    pub fn app_context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            no_color: self.no_color,
            verbose: self.verbose,
            repo_root: self.repo_root.clone(),
            engine: self.engine,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive loop: prompt, apply, undo, redo
    Session(SessionArgs),

    /// One cycle: build context, ask the model, preview (and optionally apply)
    Ask(AskArgs),

    /// Print the model payload for the selected files
    Context(ContextArgs),

    /// Show the patch a saved model response would produce
    Preview(PreviewArgs),

    /// Apply a saved model response with a checkpoint
    Apply(ApplyArgs),

    /// Revert the most recently applied patch
    Revert(RevertArgs),

    /// Inspect and prune stored checkpoints
    Checkpoints(CheckpointsArgs),

    /// Copy a directory tree with numbered file contents to the clipboard
    Copydir(CopydirArgs),

    /// Initialize a diffdev.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct SessionArgs {
    /// Files or directories to start with
    pub paths: Vec<PathBuf>,

    /// Skip unreadable files instead of failing
    #[arg(long)]
    pub partial: bool,
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    /// What to change
    pub instruction: String,

    /// Files or directories to include
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Apply the patch after showing it
    #[arg(long)]
    pub apply: bool,

    /// Skip unreadable files instead of failing
    #[arg(long)]
    pub partial: bool,

    /// Write the raw model answer to this file
    #[arg(long, value_name = "FILE")]
    pub save_response: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ContextArgs {
    /// Files or directories to include
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Instruction appended after the files
    #[arg(short, long)]
    pub instruction: Option<String>,

    /// Copy result to clipboard
    #[arg(long)]
    pub clipboard: bool,

    /// Skip unreadable files instead of failing
    #[arg(long)]
    pub partial: bool,

    /// Emit the payload as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct PreviewArgs {
    /// File holding the model response ("-" for stdin)
    #[arg(short, long, value_name = "FILE")]
    pub response: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// File holding the model response ("-" for stdin)
    #[arg(short, long, value_name = "FILE")]
    pub response: PathBuf,
}

#[derive(Parser, Debug)]
pub struct RevertArgs {
    /// Revert even if files changed after the patch was applied
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct CheckpointsArgs {
    #[command(subcommand)]
    pub command: CheckpointsSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointsSubcommand {
    /// List checkpoints, newest first
    List(CheckpointListArgs),

    /// Remove old checkpoints (the latest applied one is always kept)
    Cleanup(CheckpointCleanupArgs),
}

#[derive(Args, Debug)]
pub struct CheckpointListArgs {
    /// Limit result count
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CheckpointCleanupArgs {
    /// RFC3339 or relative span: 7d, 24h, 90m, 45s, 2w
    #[arg(long)]
    pub older_than: Option<String>,

    /// Keep N newest checkpoints; remove the rest
    #[arg(long)]
    pub keep_latest: Option<usize>,

    /// Simulate without deleting anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct CopydirArgs {
    /// Directory to dump (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Print to stdout instead of the clipboard
    #[arg(long)]
    pub stdout: bool,

    /// Maximum depth to traverse
    #[arg(short, long)]
    pub depth: Option<usize>,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_reach_the_context() {
        let cli = Cli::try_parse_from([
            "diffdev",
            "revert",
            "--quiet",
            "--engine",
            "internal",
            "--repo-root",
            "/tmp/x",
        ])
        .unwrap();
        let ctx = cli.app_context();
        assert!(ctx.quiet);
        assert_eq!(ctx.engine, Some(EngineKind::Internal));
        assert_eq!(ctx.repo_root, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn ask_requires_paths() {
        assert!(Cli::try_parse_from(["diffdev", "ask", "do it"]).is_err());
        assert!(Cli::try_parse_from(["diffdev", "ask", "do it", "src"]).is_ok());
    }
}
