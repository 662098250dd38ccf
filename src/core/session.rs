//! Command handlers and the interactive session
//!
//! Every handler runs the same pipeline: context, model, parse, synthesize,
//! then checkpoint and apply through [`PatchEngine`]. The session keeps one
//! engine alive across prompts so `undo` and `redo` work in memory; one-shot
//! commands resume it from the checkpoint store instead.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{
    AppContext, ApplyArgs, AskArgs, CheckpointCleanupArgs, CheckpointListArgs, CheckpointsArgs,
    CheckpointsSubcommand, PreviewArgs, RevertArgs, SessionArgs,
};
use crate::core::apply_engine::{PatchEngine, create_engine};
use crate::core::checkpoint::{CheckpointStore, CleanupRequest};
use crate::core::context::{ContextBuilder, ContextPayload, expand_selection};
use crate::core::edit::parse_edit_document;
use crate::core::error::PatchError;
use crate::core::model::{AnthropicClient, ModelClient, build_prompt};
use crate::core::patch::{Patch, PatchConfig, Synthesizer};
use crate::infra::config::{Config, EngineKind, load_config};
use crate::infra::utils::{discover_repo_root, display_rel};

/// Repository root plus the configuration loaded from it
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
}

impl Workspace {
    pub fn open(ctx: &AppContext) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let root = discover_repo_root(ctx.repo_root.as_deref(), &cwd);
        let config = load_config(&root)?;
        tracing::debug!(root = %root.display(), "workspace opened");
        Ok(Self { root, config })
    }

    /// `--engine` wins over `[apply] engine`
    pub fn engine_kind(&self, ctx: &AppContext) -> EngineKind {
        ctx.engine.unwrap_or(self.config.apply.engine)
    }

    /// Engine resumed from the store, so the last applied patch stays revertible
    pub fn patch_engine(&self, ctx: &AppContext) -> Result<PatchEngine> {
        let primitive = create_engine(
            self.engine_kind(ctx),
            &self.root,
            self.config.apply.context_lines,
        )?;
        PatchEngine::resume(CheckpointStore::new(&self.root), primitive)
    }

    /// Read the selected files
    pub fn build_context(&self, selection: &[PathBuf], partial: bool) -> Result<ContextPayload> {
        let builder = ContextBuilder::new(&self.root, &self.config.context)?
            .with_partial(partial || self.config.context.partial);
        Ok(builder.build(selection)?)
    }

    /// Parse a model answer and synthesize it against `payload` (or disk)
    pub fn patch_from_response(
        &self,
        payload: Option<&ContextPayload>,
        raw: &str,
    ) -> Result<Patch, PatchError> {
        let doc = parse_edit_document(raw)?;
        tracing::debug!(
            files = doc.files.len(),
            operations = doc.operation_count(),
            "edit document parsed"
        );

        let mut synth = Synthesizer::new(&self.root).with_config(PatchConfig {
            context_lines: self.config.apply.context_lines,
        });
        if let Some(p) = payload {
            synth = synth.with_context(p);
        }
        synth.synthesize(&doc)
    }
}

/// Colour a unified diff for the terminal
pub fn render_diff(text: &str, no_color: bool) -> String {
    if no_color {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for line in text.split_inclusive('\n') {
        let (body, nl) = match line.strip_suffix('\n') {
            Some(b) => (b, "\n"),
            None => (line, ""),
        };
        let painted = if body.starts_with("+++") || body.starts_with("---") || body.starts_with("diff --git") {
            body.bold().to_string()
        } else if body.starts_with("@@") {
            body.cyan().to_string()
        } else if body.starts_with('+') {
            body.green().to_string()
        } else if body.starts_with('-') {
            body.red().to_string()
        } else {
            body.to_string()
        };
        out.push_str(&painted);
        out.push_str(nl);
    }
    out
}

fn spinner(ctx: &AppContext, msg: &str) -> ProgressBar {
    if ctx.quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Send the payload and wait for the whole answer
fn ask_model(
    client: &dyn ModelClient,
    ws: &Workspace,
    payload: &ContextPayload,
    instruction: &str,
    ctx: &AppContext,
) -> Result<String, PatchError> {
    let prompt = build_prompt(&ws.config.model, payload, instruction);
    let pb = spinner(ctx, &format!("Waiting for {}...", ws.config.model.name));
    let answer = client.complete(&prompt);
    pb.finish_and_clear();
    answer
}

fn read_response(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read response from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read response file: {}", path.display()))
}

/// Print the patch on stdout and its summary on stderr
fn show_patch(patch: &Patch, ctx: &AppContext) {
    print!("{}", render_diff(patch.text(), ctx.no_color));
    if !ctx.quiet {
        eprintln!("{}", patch.summary());
    }
}

fn report_applied(engine: &PatchEngine, id: &str, ctx: &AppContext) {
    if ctx.quiet {
        return;
    }
    let msg = format!("✓ Applied with engine={} (checkpoint {id})", engine.engine_name());
    if ctx.no_color {
        eprintln!("{msg}");
    } else {
        eprintln!("{}", msg.green());
    }
}

pub fn preview_run(args: PreviewArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let raw = read_response(&args.response)?;
    let patch = ws.patch_from_response(None, &raw)?;

    if patch.is_empty() {
        if !ctx.quiet {
            eprintln!("No changes.");
        }
        return Ok(());
    }
    show_patch(&patch, ctx);
    Ok(())
}

pub fn apply_run(args: ApplyArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let raw = read_response(&args.response)?;
    let patch = ws.patch_from_response(None, &raw)?;

    if patch.is_empty() {
        if !ctx.quiet {
            eprintln!("No changes; nothing applied.");
        }
        return Ok(());
    }
    show_patch(&patch, ctx);

    let mut engine = ws.patch_engine(ctx)?;
    let id = engine.checkpoint_and_apply(patch)?;
    report_applied(&engine, &id, ctx);
    Ok(())
}

pub fn ask_run(args: AskArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let selection = expand_selection(&ws.root, &args.paths, &ws.config.context)?;
    let payload = ws.build_context(&selection, args.partial)?;
    report_failures(&payload, ctx);

    let client = AnthropicClient::from_env(&ws.config.model)?;
    let raw = ask_model(&client, &ws, &payload, &args.instruction, ctx)?;

    if let Some(path) = &args.save_response {
        std::fs::write(path, &raw)
            .with_context(|| format!("Failed to save response to {}", path.display()))?;
    }

    let patch = ws.patch_from_response(Some(&payload), &raw)?;
    if patch.is_empty() {
        if !ctx.quiet {
            eprintln!("No changes.");
        }
        return Ok(());
    }
    show_patch(&patch, ctx);

    if !args.apply {
        if !ctx.quiet {
            eprintln!("Preview only. Use --apply to write changes.");
        }
        return Ok(());
    }

    let mut engine = ws.patch_engine(ctx)?;
    let id = engine.checkpoint_and_apply(patch)?;
    report_applied(&engine, &id, ctx);
    Ok(())
}

pub fn revert_run(args: RevertArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let mut engine = ws.patch_engine(ctx)?.with_force(args.force);
    let restored = engine.revert()?;

    if !ctx.quiet {
        eprintln!("Reverted {} file(s):", restored.len());
        for p in &restored {
            eprintln!("  • {}", display_rel(p));
        }
    }
    Ok(())
}

pub fn checkpoints_run(args: CheckpointsArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let store = CheckpointStore::new(&ws.root);

    match args.command {
        CheckpointsSubcommand::List(list) => checkpoints_list(&store, &list, ctx),
        CheckpointsSubcommand::Cleanup(cleanup) => checkpoints_cleanup(&store, &cleanup, ctx),
    }
}

fn checkpoints_list(store: &CheckpointStore, args: &CheckpointListArgs, ctx: &AppContext) -> Result<()> {
    let mut rows = store.list()?;
    rows.truncate(args.limit);

    if args.json {
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        if !ctx.quiet {
            println!("No checkpoints.");
        }
        return Ok(());
    }

    for row in rows {
        let status = format!("{:<8}", row.status.to_string());
        let status = if ctx.no_color {
            status
        } else {
            status.yellow().to_string()
        };
        println!("{}  {}  {:<8}  {}", row.id, status, row.engine, row.summary);
    }
    Ok(())
}

fn checkpoints_cleanup(
    store: &CheckpointStore,
    args: &CheckpointCleanupArgs,
    ctx: &AppContext,
) -> Result<()> {
    if args.older_than.is_none() && args.keep_latest.is_none() {
        anyhow::bail!("Specify --older-than and/or --keep-latest");
    }

    let result = store.cleanup(&CleanupRequest {
        older_than: args.older_than.clone(),
        keep_latest: args.keep_latest,
        dry_run: args.dry_run,
    })?;

    if !ctx.quiet {
        let verb = if args.dry_run { "Would remove" } else { "Removed" };
        println!(
            "{verb} {} checkpoint(s), {} bytes",
            result.removed.len(),
            result.bytes_freed
        );
        for id in &result.removed {
            println!("  • {id}");
        }
    }
    for e in &result.errors {
        eprintln!("warning: {e}");
    }
    Ok(())
}

fn report_failures(payload: &ContextPayload, ctx: &AppContext) {
    if ctx.quiet {
        return;
    }
    for f in &payload.failures {
        eprintln!("skipped {} ({})", f.path.display(), f.reason);
    }
}

/// What the loop should do after a line
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Interactive loop state: one engine, one selection, one model client
pub struct Session<'a> {
    ws: Workspace,
    client: &'a dyn ModelClient,
    engine: PatchEngine,
    selection: Vec<PathBuf>,
    partial: bool,
    last_patch: Option<Patch>,
    ctx: AppContext,
}

impl<'a> Session<'a> {
    pub fn new(
        ws: Workspace,
        client: &'a dyn ModelClient,
        engine: PatchEngine,
        ctx: &AppContext,
    ) -> Self {
        Self {
            ws,
            client,
            engine,
            selection: Vec::new(),
            partial: false,
            last_patch: None,
            ctx: ctx.clone(),
        }
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn engine(&self) -> &PatchEngine {
        &self.engine
    }

    pub fn selection(&self) -> &[PathBuf] {
        &self.selection
    }

    /// Replace the selection; directories expand through the walker
    pub fn select(&mut self, inputs: &[PathBuf]) -> Result<usize> {
        let selection = expand_selection(&self.ws.root, inputs, &self.ws.config.context)?;
        // Fail now rather than on the next prompt
        self.ws.build_context(&selection, self.partial)?;
        self.selection = selection;
        Ok(self.selection.len())
    }

    /// Handle one input line, writing user-facing text to `out`
    pub fn handle_line(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow> {
        let line = line.trim();
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        // Bare words are commands only on their own; `select` takes arguments
        let command = if head.eq_ignore_ascii_case("select") {
            "select".to_string()
        } else {
            line.to_lowercase()
        };

        match command.as_str() {
            "" => {}
            "exit" | "quit" => return Ok(Flow::Exit),
            "help" => writeln!(out, "{HELP}")?,
            "select" => {
                let inputs: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                if inputs.is_empty() {
                    for p in &self.selection {
                        writeln!(out, "  {}", display_rel(p))?;
                    }
                } else {
                    let n = self.select(&inputs)?;
                    writeln!(out, "Updated context with {n} file(s).")?;
                }
            }
            "undo" => {
                let restored = self.engine.revert()?;
                writeln!(out, "Changes rolled back ({} file(s)).", restored.len())?;
            }
            "redo" => {
                self.engine.redo()?;
                writeln!(out, "Changes reapplied.")?;
            }
            "patch" => match self.engine.applied_patch().or(self.last_patch.as_ref()) {
                Some(p) => write!(out, "{}", render_diff(p.text(), self.ctx.no_color))?,
                None => writeln!(out, "No patch yet.")?,
            },
            _ => self.prompt(line, out)?,
        }

        Ok(Flow::Continue)
    }

    /// One full cycle for a free-text instruction
    fn prompt(&mut self, instruction: &str, out: &mut dyn Write) -> Result<()> {
        if self.selection.is_empty() {
            writeln!(out, "No files selected. Use: select <paths>")?;
            return Ok(());
        }

        // Rebuilt every cycle: earlier applies changed the files
        let payload = self.ws.build_context(&self.selection, self.partial)?;
        let raw = ask_model(self.client, &self.ws, &payload, instruction, &self.ctx)?;
        let patch = self.ws.patch_from_response(Some(&payload), &raw)?;

        if patch.is_empty() {
            writeln!(out, "No changes.")?;
            return Ok(());
        }

        write!(out, "{}", render_diff(patch.text(), self.ctx.no_color))?;
        self.last_patch = Some(patch.clone());
        let id = self.engine.checkpoint_and_apply(patch)?;
        writeln!(out, "Changes applied (checkpoint {id}).")?;
        Ok(())
    }

    /// Read lines from `input` until `exit` or end of input
    pub fn run(&mut self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "{HELP}")?;
        loop {
            write!(out, "\n> ")?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                break;
            }

            match self.handle_line(&line, out) {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                // A failed cycle never ends the session
                Err(e) => writeln!(out, "Error: {e:#}")?,
            }
        }
        Ok(())
    }
}

const HELP: &str = "Commands: select <paths> | undo | redo | patch | exit. Anything else is sent to the model.";

pub fn session_run(args: SessionArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let client = AnthropicClient::from_env(&ws.config.model)?;
    let engine = ws.patch_engine(ctx)?;

    let mut session = Session::new(ws, &client, engine, ctx).with_partial(args.partial);
    if !args.paths.is_empty() {
        let n = session.select(&args.paths)?;
        println!("Initialized context with {n} file(s).");
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    session.run(&mut stdin.lock(), &mut stdout.lock())
}
