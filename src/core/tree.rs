//! Directory dump for pasting into a chat: a `├──` tree followed by every
//! file with line numbers.
//!
//! Directories sort before files, names compare case-insensitively, and
//! anything ignored by `.gitignore` or the configured globs is left out.

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cli::{AppContext, CopydirArgs};
use crate::core::context::copy_to_clipboard;
use crate::infra::config::load_config;
use crate::infra::io::{ReadTextError, read_text_exact};
use crate::infra::utils::{discover_repo_root, display_rel};
use crate::infra::walk::FileWalker;

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE: &str = "│   ";
const INDENT: &str = "    ";

pub fn run(args: CopydirArgs, ctx: &AppContext) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let target = match &args.path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => cwd.join(p),
        None => cwd.clone(),
    };
    if !target.is_dir() {
        bail!("Directory not found: {}", target.display());
    }
    let target = dunce::canonicalize(&target).unwrap_or(target);

    // Ignore globs come from the enclosing repository's config
    let repo_root = discover_repo_root(ctx.repo_root.as_deref(), &target);
    let config = load_config(&repo_root)?;
    let walker = FileWalker::new(&config.context.ignore_patterns)?.with_max_depth(args.depth);

    let dump = render_directory(&target, &walker)?;

    if !args.stdout {
        match copy_to_clipboard(&dump) {
            Ok(()) => {
                if !ctx.quiet {
                    let msg = format!("✓ Copied {} to clipboard", target.display());
                    if ctx.no_color {
                        eprintln!("{msg}");
                    } else {
                        eprintln!("{}", msg.green());
                    }
                }
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "clipboard unavailable, printing to stdout instead")
            }
        }
    }

    print!("{dump}");
    Ok(())
}

#[derive(Debug)]
struct TreeNode {
    name: String,
    is_dir: bool,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn new(name: String, is_dir: bool) -> Self {
        Self {
            name,
            is_dir,
            children: BTreeMap::new(),
        }
    }

    /// Insert a file path relative to this node, creating directories on the way.
    fn insert_file(&mut self, relative_path: &Path) {
        let mut components = relative_path.components();
        let Some(first) = components.next() else {
            return;
        };
        let remaining: PathBuf = components.collect();
        let name = first.as_os_str().to_string_lossy().to_string();
        let is_leaf = remaining.as_os_str().is_empty();

        let entry = self
            .children
            .entry(name.clone())
            .or_insert_with(|| TreeNode::new(name, !is_leaf));

        if !is_leaf {
            entry.insert_file(&remaining);
        }
    }

    /// Children with directories first, then case-insensitive by name
    fn sorted_children(&self) -> Vec<&TreeNode> {
        let mut children: Vec<&TreeNode> = self.children.values().collect();
        children.sort_by(|a, b| {
            (!a.is_dir, a.name.to_lowercase(), &a.name).cmp(&(!b.is_dir, b.name.to_lowercase(), &b.name))
        });
        children
    }

    fn render(&self, prefix: &str, out: &mut String) {
        let children = self.sorted_children();
        let last = children.len().saturating_sub(1);

        for (i, child) in children.into_iter().enumerate() {
            let is_last = i == last;
            out.push_str(prefix);
            out.push_str(if is_last { LAST_BRANCH } else { BRANCH });
            out.push_str(&child.name);
            out.push('\n');

            if child.is_dir {
                let next = format!("{prefix}{}", if is_last { INDENT } else { PIPE });
                child.render(&next, out);
            }
        }
    }

    /// Files in display order (the order the tree shows them)
    fn files_in_order(&self, base: &Path, out: &mut Vec<PathBuf>) {
        for child in self.sorted_children() {
            let path = base.join(&child.name);
            if child.is_dir {
                child.files_in_order(&path, out);
            } else {
                out.push(path);
            }
        }
    }
}

fn build_tree(root: &Path, walker: &FileWalker) -> TreeNode {
    let name = root
        .file_name()
        .unwrap_or(root.as_os_str())
        .to_string_lossy()
        .to_string();
    let mut tree = TreeNode::new(name, true);

    for file_path in walker.walk_files(root) {
        if let Ok(rel) = file_path.strip_prefix(root) {
            tree.insert_file(rel);
        }
    }

    tree
}

/// Tree section plus numbered contents of every file under `root`.
pub fn render_directory(root: &Path, walker: &FileWalker) -> Result<String> {
    let tree = build_tree(root, walker);

    let mut out = String::from("File Tree:\n");
    tree.render("", &mut out);
    out.push_str("\nFile Contents:\n");

    let mut files = Vec::new();
    tree.files_in_order(Path::new(""), &mut files);
    tracing::debug!(files = files.len(), root = %root.display(), "rendering directory dump");

    for rel in files {
        out.push_str(&format_file_content(&root.join(&rel), &display_rel(&rel)));
    }

    Ok(out)
}

/// One file block: `path:`, an 80-dash rule, right-aligned line numbers.
fn format_file_content(path: &Path, label: &str) -> String {
    let separator = "-".repeat(80);

    let text = match read_text_exact(path) {
        Ok(t) => t,
        Err(ReadTextError::NotUtf8) => return format!("\n{label}: [Binary file]\n"),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable file in directory dump");
            return format!("\n{label}: [Error reading file: {e}]\n");
        }
    };

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let width = lines.len().to_string().len();

    let mut body = String::with_capacity(text.len() + lines.len() * (width + 3));
    for (i, line) in lines.iter().enumerate() {
        body.push_str(&format!("{:>width$} | {line}", i + 1));
    }
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    format!("\n{label}:\n{separator}\n{body}{separator}\n")
}
