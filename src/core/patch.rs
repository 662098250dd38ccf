//! Search/replace to unified diff synthesis
//!
//! Each file's operations run against progressively updated lines; a search
//! block must occur exactly once, compared line by line with no trimming.
//! Line terminators are kept per line so untouched bytes survive, and the
//! final diff is computed with `similar` and rendered as a git patch.

use anyhow::{Result, bail};
use indexmap::IndexMap;
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};

use crate::core::context::ContextPayload;
use crate::core::edit::{EditDocument, EditOperation};
use crate::core::error::{ContextFailure, PatchError};
use crate::infra::io::read_text_if_exists;
use crate::infra::utils::{display_rel, normalize_repo_rel};

/// A single hunk in a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize, // 1-based line number in old file (0 when old_count is 0 at start)
    pub old_count: usize, // Number of lines in old version
    pub new_start: usize, // 1-based line number in new file
    pub new_count: usize, // Number of lines in new version
    pub lines: Vec<HunkLine>,
}

/// A line in a hunk with its change type. Text excludes the `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String), // Unchanged line (starts with ' ')
    Remove(String),  // Removed line (starts with '-')
    Add(String),     // Added line (starts with '+')
    NoNewline,       // Previous line has no terminator
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
}

/// Diff for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Repo-relative path with forward slashes
    pub path: String,
    pub kind: FileChangeKind,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    pub fn added_removed(&self) -> (usize, usize) {
        let mut added = 0;
        let mut removed = 0;
        for line in self.hunks.iter().flat_map(|h| &h.lines) {
            match line {
                HunkLine::Add(_) => added += 1,
                HunkLine::Remove(_) => removed += 1,
                _ => {}
            }
        }
        (added, removed)
    }
}

/// Unified diff over every touched file, in document order. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    files: Vec<FilePatch>,
    text: String,
}

impl Patch {
    pub fn new(files: Vec<FilePatch>) -> Self {
        let text = render_unified_diff(&files);
        Self { files, text }
    }

    /// Rebuild from rendered text (checkpoint store, saved patches)
    pub fn from_text(text: &str) -> Result<Self> {
        let files = parse_unified_diff(text)?;
        Ok(Self {
            files,
            text: text.to_string(),
        })
    }

    pub fn files(&self) -> &[FilePatch] {
        &self.files
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Repo-relative paths the patch writes
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| PathBuf::from(&f.path)).collect()
    }

    /// One-line summary, e.g. `2 file(s) changed, +3 -1`
    pub fn summary(&self) -> String {
        let (added, removed) = self
            .files
            .iter()
            .map(FilePatch::added_removed)
            .fold((0, 0), |(a, r), (x, y)| (a + x, r + y));
        format!(
            "{} file(s) changed, +{} -{}",
            self.files.len(),
            added,
            removed
        )
    }
}

/// Synthesis configuration
#[derive(Debug, Clone)]
pub struct PatchConfig {
    pub context_lines: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self { context_lines: 3 }
    }
}

/// Turns an edit document into a patch against the current tree.
pub struct Synthesizer<'a> {
    repo_root: &'a Path,
    payload: Option<&'a ContextPayload>,
    config: PatchConfig,
}

impl<'a> Synthesizer<'a> {
    pub fn new(repo_root: &'a Path) -> Self {
        Self {
            repo_root,
            payload: None,
            config: PatchConfig::default(),
        }
    }

    /// Match against the captured context instead of re-reading disk
    pub fn with_context(mut self, payload: &'a ContextPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_config(mut self, config: PatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Synthesize the whole document; any failure aborts everything.
    #[tracing::instrument(level = "debug", skip_all, fields(files = doc.files.len()))]
    pub fn synthesize(&self, doc: &EditDocument) -> Result<Patch, PatchError> {
        // Same-file change sets merge in document order
        let mut by_file: IndexMap<PathBuf, Vec<&EditOperation>> = IndexMap::new();
        for set in &doc.files {
            let rel = normalize_repo_rel(Path::new(&set.filename)).map_err(|e| {
                PatchError::MalformedEditDocument {
                    reason: format!("filename {:?}: {e}", set.filename),
                    raw: String::new(),
                }
            })?;
            by_file.entry(rel).or_default().extend(set.changes.iter());
        }

        let mut files = Vec::new();
        for (rel, ops) in by_file {
            let (original, existed) = self.source_text(&rel)?;
            let filename = display_rel(&rel);

            let updated = apply_operations(&filename, &original, &ops)?;
            if updated == original {
                tracing::debug!(file = %filename, "no effective change");
                continue;
            }
            if !existed && updated.is_empty() {
                continue;
            }

            let kind = if existed {
                FileChangeKind::Modified
            } else {
                FileChangeKind::Created
            };
            let hunks = diff_hunks(&original, &updated, self.config.context_lines);
            files.push(FilePatch {
                path: filename,
                kind,
                hunks,
            });
        }

        Ok(Patch::new(files))
    }

    /// Context snapshot first, then disk, then empty for new files
    fn source_text(&self, rel: &Path) -> Result<(String, bool), PatchError> {
        if let Some(sel) = self.payload.and_then(|p| p.get(rel)) {
            return Ok((sel.content.clone(), true));
        }
        let abs = self.repo_root.join(rel);
        match read_text_if_exists(&abs) {
            Ok(Some(text)) => Ok((text, true)),
            Ok(None) => Ok((String::new(), false)),
            Err(e) => Err(PatchError::ContextBuild {
                failures: vec![ContextFailure {
                    path: rel.to_path_buf(),
                    reason: format!("{e:#}"),
                }],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eol {
    Lf,
    CrLf,
    None,
}

impl Eol {
    fn as_str(self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
            Eol::None => "",
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    eol: Eol,
}

/// Split into lines; the terminator is kept apart from the text
fn split_lines(text: &str) -> Vec<Line> {
    text.split_inclusive('\n')
        .map(|piece| {
            if let Some(body) = piece.strip_suffix("\r\n") {
                Line {
                    text: body.to_string(),
                    eol: Eol::CrLf,
                }
            } else if let Some(body) = piece.strip_suffix('\n') {
                Line {
                    text: body.to_string(),
                    eol: Eol::Lf,
                }
            } else {
                Line {
                    text: piece.to_string(),
                    eol: Eol::None,
                }
            }
        })
        .collect()
}

/// Run `ops` in order over `original`, returning the final text.
pub fn apply_operations(
    filename: &str,
    original: &str,
    ops: &[&EditOperation],
) -> Result<String, PatchError> {
    let mut lines = split_lines(original);
    let dominant = lines
        .iter()
        .map(|l| l.eol)
        .find(|e| *e != Eol::None)
        .unwrap_or(Eol::Lf);
    let trailing_newline = original.is_empty() || original.ends_with('\n');

    for op in ops {
        let fresh = |text: &String| Line {
            text: text.clone(),
            eol: dominant,
        };

        if op.search.is_empty() {
            if !lines.is_empty() {
                return Err(PatchError::EmptySearchBlock {
                    filename: filename.to_string(),
                });
            }
            lines = op.replace.iter().map(fresh).collect();
            continue;
        }

        let positions = find_block(&lines, &op.search);
        match positions.as_slice() {
            [] => {
                return Err(PatchError::SearchBlockNotFound {
                    filename: filename.to_string(),
                    block: op.search.clone(),
                });
            }
            [at] => {
                let at = *at;
                let replacement: Vec<Line> = op.replace.iter().map(fresh).collect();
                lines.splice(at..at + op.search.len(), replacement);
            }
            many => {
                return Err(PatchError::AmbiguousSearchBlock {
                    filename: filename.to_string(),
                    block: op.search.clone(),
                    occurrences: many.len(),
                });
            }
        }
    }

    // Interior lines always end; the last one follows the original file
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter_mut().enumerate() {
        if i < last {
            if line.eol == Eol::None {
                line.eol = dominant;
            }
        } else if !trailing_newline {
            line.eol = Eol::None;
        } else if line.eol == Eol::None {
            line.eol = dominant;
        }
    }

    Ok(lines
        .iter()
        .map(|l| format!("{}{}", l.text, l.eol.as_str()))
        .collect())
}

/// Start indexes of every exact occurrence of `block`
fn find_block(lines: &[Line], block: &[String]) -> Vec<usize> {
    if block.len() > lines.len() {
        return Vec::new();
    }
    (0..=lines.len() - block.len())
        .filter(|&i| {
            lines[i..i + block.len()]
                .iter()
                .zip(block)
                .all(|(l, b)| l.text == *b)
        })
        .collect()
}

/// Unified hunks between two texts
pub fn diff_hunks(original: &str, updated: &str, context_lines: usize) -> Vec<Hunk> {
    let diff = TextDiff::from_lines(original, updated);
    let mut hunks = Vec::new();

    for group in diff.grouped_ops(context_lines) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let value = change.value();
                let text = value.strip_suffix('\n').unwrap_or(value).to_string();
                lines.push(match change.tag() {
                    ChangeTag::Equal => HunkLine::Context(text),
                    ChangeTag::Delete => HunkLine::Remove(text),
                    ChangeTag::Insert => HunkLine::Add(text),
                });
                if !value.ends_with('\n') {
                    lines.push(HunkLine::NoNewline);
                }
            }
        }

        let start = |range: &std::ops::Range<usize>| {
            if range.is_empty() {
                range.start
            } else {
                range.start + 1
            }
        };
        hunks.push(Hunk {
            old_start: start(&old_range),
            old_count: old_range.len(),
            new_start: start(&new_range),
            new_count: new_range.len(),
            lines,
        });
    }

    hunks
}

/// Render file patches as one git-style unified diff
pub fn render_unified_diff(files: &[FilePatch]) -> String {
    let mut output = String::new();

    for file_patch in files {
        render_file_patch(&mut output, file_patch);
    }

    output
}

fn render_file_patch(output: &mut String, file_patch: &FilePatch) {
    let path = &file_patch.path;
    output.push_str(&format!("diff --git a/{path} b/{path}\n"));
    match file_patch.kind {
        FileChangeKind::Created => {
            output.push_str("new file mode 100644\n");
            output.push_str("--- /dev/null\n");
        }
        FileChangeKind::Modified => output.push_str(&format!("--- a/{path}\n")),
    }
    output.push_str(&format!("+++ b/{path}\n"));

    for hunk in &file_patch.hunks {
        render_hunk(output, hunk);
    }
}

fn render_hunk(output: &mut String, hunk: &Hunk) {
    output.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
    ));

    for line in &hunk.lines {
        match line {
            HunkLine::Context(content) => output.push_str(&format!(" {}\n", content)),
            HunkLine::Remove(content) => output.push_str(&format!("-{}\n", content)),
            HunkLine::Add(content) => output.push_str(&format!("+{}\n", content)),
            HunkLine::NoNewline => output.push_str("\\ No newline at end of file\n"),
        }
    }
}

/// Parse a git-style unified diff as produced by [`render_unified_diff`].
pub fn parse_unified_diff(text: &str) -> Result<Vec<FilePatch>> {
    let mut files: Vec<FilePatch> = Vec::new();
    let mut lines = text.split('\n').enumerate().peekable();

    while let Some((n, line)) = lines.next() {
        if line.is_empty() && lines.peek().is_none() {
            break;
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            let path = rest
                .rsplit_once(" b/")
                .map(|(_, p)| p.to_string())
                .unwrap_or_default();
            files.push(FilePatch {
                path,
                kind: FileChangeKind::Modified,
                hunks: Vec::new(),
            });
            continue;
        }

        let Some(current) = files.last_mut() else {
            bail!("malformed patch at line {}: content before file header", n + 1);
        };

        if line.starts_with("new file mode") {
            current.kind = FileChangeKind::Created;
        } else if line == "--- /dev/null" {
            current.kind = FileChangeKind::Created;
        } else if line.starts_with("--- ") || line.starts_with("index ") {
            // informational
        } else if let Some(p) = line.strip_prefix("+++ ") {
            let p = p.trim_end_matches('\t');
            current.path = p.strip_prefix("b/").unwrap_or(p).to_string();
        } else if line.starts_with("@@") {
            let mut hunk = parse_hunk_header(line)
                .ok_or_else(|| anyhow::anyhow!("malformed hunk header at line {}: {line}", n + 1))?;

            let mut old_left = hunk.old_count;
            let mut new_left = hunk.new_count;
            while old_left > 0 || new_left > 0 {
                let Some((m, body)) = lines.next() else {
                    bail!("patch truncated inside hunk starting at line {}", n + 1);
                };
                let mut chars = body.chars();
                let tag = chars.next();
                let content = chars.as_str().to_string();
                match tag {
                    Some(' ') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        hunk.lines.push(HunkLine::Context(content));
                    }
                    Some('-') => {
                        old_left = old_left.saturating_sub(1);
                        hunk.lines.push(HunkLine::Remove(content));
                    }
                    Some('+') => {
                        new_left = new_left.saturating_sub(1);
                        hunk.lines.push(HunkLine::Add(content));
                    }
                    Some('\\') => hunk.lines.push(HunkLine::NoNewline),
                    _ => bail!("unexpected line {} inside hunk: {body:?}", m + 1),
                }
            }
            if let Some((_, next)) = lines.peek()
                && next.starts_with('\\')
            {
                lines.next();
                hunk.lines.push(HunkLine::NoNewline);
            }

            current.hunks.push(hunk);
        } else if !line.is_empty() {
            tracing::debug!(line = n + 1, "ignoring patch header line");
        }
    }

    if let Some(bad) = files.iter().find(|f| f.path.is_empty()) {
        bail!("patch entry without a target path: {bad:?}");
    }
    Ok(files)
}

/// `@@ -a,b +c,d @@`; omitted counts default to 1
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let inner = line.strip_prefix("@@ ")?;
    let (ranges, _) = inner.split_once(" @@")?;
    let (old, new) = ranges.split_once(' ')?;

    let range = |s: &str| -> Option<(usize, usize)> {
        match s.split_once(',') {
            Some((a, b)) => Some((a.parse().ok()?, b.parse().ok()?)),
            None => Some((s.parse().ok()?, 1)),
        }
    };
    let (old_start, old_count) = range(old.strip_prefix('-')?)?;
    let (new_start, new_count) = range(new.strip_prefix('+')?)?;

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

/// Apply one parsed file patch to `current`, verifying every hunk's
/// preimage exactly. Returns the new text.
pub fn apply_file_patch(current: &str, patch: &FilePatch) -> Result<String> {
    // Lines split on '\n' only; a '\r' stays part of the text like in git
    let cur: Vec<(&str, bool)> = current
        .split_inclusive('\n')
        .map(|l| match l.strip_suffix('\n') {
            Some(body) => (body, true),
            None => (l, false),
        })
        .collect();

    let mut out: Vec<(String, bool)> = Vec::with_capacity(cur.len());
    let mut cursor = 0usize;

    for (i, hunk) in patch.hunks.iter().enumerate() {
        let (old, new) = hunk_sides(hunk);
        if old.len() != hunk.old_count || new.len() != hunk.new_count {
            bail!("{}: hunk #{} line counts do not match its header", patch.path, i + 1);
        }

        let start = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < cursor || start + old.len() > cur.len() {
            bail!(
                "{}: hunk #{} does not apply at line {} (file has {} lines)",
                patch.path,
                i + 1,
                hunk.old_start,
                cur.len()
            );
        }

        let window = &cur[start..start + old.len()];
        let matches = window
            .iter()
            .zip(&old)
            .all(|((t, nl), (ot, onl))| t == ot && nl == onl);
        if !matches {
            bail!(
                "{}: hunk #{} preimage mismatch at line {}",
                patch.path,
                i + 1,
                hunk.old_start
            );
        }

        out.extend(cur[cursor..start].iter().map(|(t, nl)| (t.to_string(), *nl)));
        out.extend(new);
        cursor = start + old.len();
    }
    out.extend(cur[cursor..].iter().map(|(t, nl)| (t.to_string(), *nl)));

    Ok(out
        .into_iter()
        .map(|(t, nl)| if nl { t + "\n" } else { t })
        .collect())
}

type Side = Vec<(String, bool)>;

/// Old and new line sequences of a hunk, with newline presence
fn hunk_sides(hunk: &Hunk) -> (Side, Side) {
    let mut old: Side = Vec::new();
    let mut new: Side = Vec::new();
    // Which sides the previous line belonged to (old, new)
    let mut last = (false, false);

    for line in &hunk.lines {
        match line {
            HunkLine::Context(t) => {
                old.push((t.clone(), true));
                new.push((t.clone(), true));
                last = (true, true);
            }
            HunkLine::Remove(t) => {
                old.push((t.clone(), true));
                last = (true, false);
            }
            HunkLine::Add(t) => {
                new.push((t.clone(), true));
                last = (false, true);
            }
            HunkLine::NoNewline => {
                if last.0
                    && let Some(l) = old.last_mut()
                {
                    l.1 = false;
                }
                if last.1
                    && let Some(l) = new.last_mut()
                {
                    l.1 = false;
                }
            }
        }
    }

    (old, new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::SelectedFile;
    use crate::core::edit::FileChangeSet;
    use tempfile::TempDir;

    fn op(search: &[&str], replace: &[&str]) -> EditOperation {
        EditOperation {
            search: search.iter().map(|s| s.to_string()).collect(),
            replace: replace.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn doc(sets: Vec<(&str, Vec<EditOperation>)>) -> EditDocument {
        EditDocument {
            files: sets
                .into_iter()
                .map(|(f, changes)| FileChangeSet {
                    filename: f.to_string(),
                    changes,
                })
                .collect(),
        }
    }

    fn payload(files: &[(&str, &str)]) -> ContextPayload {
        ContextPayload {
            files: files
                .iter()
                .map(|(p, c)| SelectedFile {
                    path: PathBuf::from(p),
                    content: c.to_string(),
                })
                .collect(),
            failures: vec![],
        }
    }

    #[test]
    fn scenario_single_replace() {
        let tmp = TempDir::new().unwrap();
        let ctx = payload(&[("a.py", "def f():\n    return 1\n")]);
        let patch = Synthesizer::new(tmp.path())
            .with_context(&ctx)
            .synthesize(&doc(vec![(
                "a.py",
                vec![op(&["    return 1"], &["    return 2"])],
            )]))
            .unwrap();

        assert_eq!(
            patch.text(),
            "diff --git a/a.py b/a.py\n--- a/a.py\n+++ b/a.py\n@@ -1,2 +1,2 @@\n def f():\n-    return 1\n+    return 2\n"
        );
        assert_eq!(patch.summary(), "1 file(s) changed, +1 -1");
    }

    #[test]
    fn later_operations_see_earlier_results() {
        let ops = [op(&["a"], &["b"]), op(&["b"], &["c"])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        assert_eq!(apply_operations("f", "a\n", &refs).unwrap(), "c\n");

        let reversed: Vec<&EditOperation> = ops.iter().rev().collect();
        assert!(matches!(
            apply_operations("f", "a\n", &reversed),
            Err(PatchError::SearchBlockNotFound { .. })
        ));
    }

    #[test]
    fn matching_is_exact_about_whitespace() {
        let ops = [op(&["  x"], &["y"])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        assert!(matches!(
            apply_operations("f", "\tx\n", &refs),
            Err(PatchError::SearchBlockNotFound { .. })
        ));
        assert!(matches!(
            apply_operations("f", "  x \n", &refs),
            Err(PatchError::SearchBlockNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_block_is_ambiguous() {
        let ops = [op(&["x = 1"], &["x = 2"])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        match apply_operations("f.py", "x = 1\ny\nx = 1\n", &refs) {
            Err(PatchError::AmbiguousSearchBlock { occurrences, .. }) => assert_eq!(occurrences, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_search_only_for_empty_files() {
        let ops = [op(&[], &["hello"])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        assert_eq!(apply_operations("n", "", &refs).unwrap(), "hello\n");
        assert!(matches!(
            apply_operations("n", "content\n", &refs),
            Err(PatchError::EmptySearchBlock { .. })
        ));
    }

    #[test]
    fn emptying_a_file_keeps_it() {
        let ops = [op(&["a", "b"], &[])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        assert_eq!(apply_operations("f", "a\nb\n", &refs).unwrap(), "");
    }

    #[test]
    fn crlf_and_missing_final_newline_are_preserved() {
        let ops = [op(&["two"], &["2", "2b"])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        assert_eq!(
            apply_operations("f", "one\r\ntwo\r\nthree", &refs).unwrap(),
            "one\r\n2\r\n2b\r\nthree"
        );

        let ops = [op(&["last"], &["last", "appended"])];
        let refs: Vec<&EditOperation> = ops.iter().collect();
        assert_eq!(
            apply_operations("f", "first\nlast", &refs).unwrap(),
            "first\nlast\nappended"
        );
    }

    #[test]
    fn new_file_gets_created_header() {
        let tmp = TempDir::new().unwrap();
        let patch = Synthesizer::new(tmp.path())
            .synthesize(&doc(vec![("src/new.rs", vec![op(&[], &["fn main() {}"])])]))
            .unwrap();

        assert_eq!(patch.files()[0].kind, FileChangeKind::Created);
        assert!(patch.text().contains("new file mode 100644\n--- /dev/null\n+++ b/src/new.rs\n@@ -0,0 +1,1 @@\n+fn main() {}\n"));
    }

    #[test]
    fn same_file_sets_merge_in_order_and_noops_vanish() {
        let tmp = TempDir::new().unwrap();
        let ctx = payload(&[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let patch = Synthesizer::new(tmp.path())
            .with_context(&ctx)
            .synthesize(&doc(vec![
                ("a.txt", vec![op(&["a"], &["a1"])]),
                ("b.txt", vec![op(&["b"], &["b"])]),
                ("a.txt", vec![op(&["a1"], &["a2"])]),
            ]))
            .unwrap();

        assert_eq!(patch.files().len(), 1);
        assert!(patch.text().contains("+a2"));
    }

    #[test]
    fn any_failure_aborts_the_document() {
        let tmp = TempDir::new().unwrap();
        let ctx = payload(&[("ok.txt", "x\n"), ("bad.txt", "y\n")]);
        let res = Synthesizer::new(tmp.path()).with_context(&ctx).synthesize(&doc(vec![
            ("ok.txt", vec![op(&["x"], &["z"])]),
            ("bad.txt", vec![op(&["nope"], &["z"])]),
        ]));
        assert!(matches!(res, Err(PatchError::SearchBlockNotFound { .. })));
    }

    #[test]
    fn falls_back_to_disk_when_not_in_context() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("disk.txt"), "on disk\n").unwrap();
        let patch = Synthesizer::new(tmp.path())
            .synthesize(&doc(vec![("disk.txt", vec![op(&["on disk"], &["changed"])])]))
            .unwrap();
        assert_eq!(patch.files()[0].kind, FileChangeKind::Modified);
    }

    #[test]
    fn parse_and_apply_reproduce_the_target() {
        let original = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl";
        let updated = "a\nB\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl\nm";
        let files = vec![FilePatch {
            path: "x.txt".into(),
            kind: FileChangeKind::Modified,
            hunks: diff_hunks(original, updated, 3),
        }];
        assert_eq!(files[0].hunks.len(), 2);

        let text = render_unified_diff(&files);
        assert!(text.contains("\\ No newline at end of file\n"));

        let parsed = parse_unified_diff(&text).unwrap();
        assert_eq!(parsed, files);
        assert_eq!(apply_file_patch(original, &parsed[0]).unwrap(), updated);
    }

    #[test]
    fn apply_rejects_changed_preimage() {
        let files = vec![FilePatch {
            path: "x.txt".into(),
            kind: FileChangeKind::Modified,
            hunks: diff_hunks("a\nb\n", "a\nc\n", 3),
        }];
        assert!(apply_file_patch("a\nzzz\n", &files[0]).is_err());
    }

    #[test]
    fn hunk_header_defaults_count_to_one() {
        let h = parse_hunk_header("@@ -3 +3,2 @@ fn x()").unwrap();
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (3, 1, 3, 2));
        assert!(parse_hunk_header("@@ bogus @@").is_none());
    }
}
