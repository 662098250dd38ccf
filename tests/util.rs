//! Shared test utilities for integration tests
//!
//! Fixture repositories, edit-document builders and a git probe used
//! across the test files.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use assert_fs::prelude::*;
use serde_json::json;

/// Repository with the two-line `a.py` used by the lifecycle scenario
pub fn make_repo() -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    tmp.child("a.py")
        .write_str("def f():\n    return 1\n")
        .expect("write a.py");

    tmp.child("pkg/util.py")
        .write_str("import os\n\n\ndef helper():\n    return os.getcwd()\n")
        .expect("write util.py");

    tmp
}

/// One search/replace pair as `(filename, search, replace)`
pub type Op<'a> = (&'a str, &'a [&'a str], &'a [&'a str]);

/// Edit document JSON for `ops`; consecutive ops on the same file share a
/// change set
pub fn edit_json(ops: &[Op<'_>]) -> String
{
    let mut files: Vec<serde_json::Value> = Vec::new();

    for (filename, search, replace) in ops
    {
        let change = json!({ "search": search, "replace": replace });
        match files.last_mut()
        {
            Some(last) if last["filename"] == *filename =>
            {
                if let Some(changes) = last["changes"].as_array_mut()
                {
                    changes.push(change);
                }
            }
            _ => files.push(json!({ "filename": filename, "changes": [change] })),
        }
    }

    json!({ "files": files }).to_string()
}

/// Wrap a document the way models usually answer
pub fn chatty(doc: &str) -> String
{
    format!("Sure! Here are the edits:\n\n```json\n{doc}\n```\n\nLet me know if you need more.")
}

/// Whether a usable `git` is on PATH
pub fn git_available() -> bool
{
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// `git init` quietly inside `dir`
pub fn git_init(dir: &Path)
{
    let status = Command::new("git")
        .args(["init", "-q"])
        .current_dir(dir)
        .status()
        .expect("spawn git init");
    assert!(status.success(), "git init failed");
}

/// Read a fixture file
pub fn read(
    root: &Path,
    rel: &str,
) -> String
{
    std::fs::read_to_string(root.join(rel)).expect("read fixture file")
}
