//! Edit document parsing
//!
//! Models answer with prose around a JSON document:
//!
//! ```json
//! {"files": [{"filename": "a.py",
//!             "changes": [{"search": ["    return 1"], "replace": ["    return 2"]}]}]}
//! ```
//!
//! Candidates are tried in order: the whole text, fenced code blocks, then
//! balanced `{ ... }` regions. The first JSON object carrying a `files` key
//! is the document; if it then fails validation the response is rejected
//! as a whole.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::core::error::PatchError;
use crate::infra::utils::normalize_repo_rel;

/// One search/replace step. Lines carry no terminators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub search: Vec<String>,
    pub replace: Vec<String>,
}

/// Ordered operations for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeSet {
    pub filename: String,
    pub changes: Vec<EditOperation>,
}

/// Decoded model answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDocument {
    pub files: Vec<FileChangeSet>,
}

impl EditDocument {
    /// Total number of operations across files
    pub fn operation_count(&self) -> usize {
        self.files.iter().map(|f| f.changes.len()).sum()
    }
}

/// Locate and decode the edit document embedded in `raw`.
pub fn parse_edit_document(raw: &str) -> Result<EditDocument, PatchError> {
    let malformed = |reason: String| PatchError::MalformedEditDocument {
        reason,
        raw: raw.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(malformed("response is empty".into()));
    }

    for candidate in candidates(raw) {
        let Ok(value) = serde_json::from_str::<Value>(candidate.trim()) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };
        if !obj.contains_key("files") {
            continue;
        }

        tracing::debug!(len = candidate.len(), "edit document candidate found");
        let doc: EditDocument = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        validate(&doc).map_err(malformed)?;
        return Ok(doc);
    }

    Err(malformed(
        "no JSON object with a \"files\" key found in response".into(),
    ))
}

fn validate(doc: &EditDocument) -> Result<(), String> {
    for (i, file) in doc.files.iter().enumerate() {
        if file.filename.trim().is_empty() {
            return Err(format!("files[{i}].filename is empty"));
        }
        if let Err(e) = normalize_repo_rel(Path::new(&file.filename)) {
            return Err(format!("files[{i}].filename {:?}: {e}", file.filename));
        }
        // One entry is one line; terminators come from the target file
        for (j, change) in file.changes.iter().enumerate() {
            let lines = [("search", &change.search), ("replace", &change.replace)];
            for (key, entries) in lines {
                if let Some(k) = entries.iter().position(|l| l.contains(['\n', '\r'])) {
                    return Err(format!(
                        "files[{i}].changes[{j}].{key}[{k}] contains a line terminator"
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Candidate JSON texts in extraction order
fn candidates(raw: &str) -> Vec<&str> {
    let mut out = vec![raw];
    out.extend(fenced_blocks(raw));
    out.extend(balanced_objects(raw));
    out
}

/// Bodies of ``` fenced blocks (any info string). The closing fence must
/// sit on its own line.
fn fenced_blocks(raw: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut open: Option<usize> = None;
    let mut offset = 0usize;

    for line in raw.split_inclusive('\n') {
        let trimmed = line.trim();
        match open {
            None if trimmed.starts_with("```") => open = Some(offset + line.len()),
            Some(start) if trimmed == "```" => {
                blocks.push(&raw[start..offset]);
                open = None;
            }
            _ => {}
        }
        offset += line.len();
    }

    blocks
}

/// Every balanced `{ ... }` region, outermost first by start position.
/// Braces inside JSON strings are skipped.
fn balanced_objects(raw: &str) -> Vec<&str> {
    let bytes = raw.as_bytes();
    let mut regions = Vec::new();

    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' {
            continue;
        }
        if let Some(end) = matching_brace(bytes, start) {
            regions.push(&raw[start..=end]);
        }
    }

    regions
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
