// Drives the compiled binary against throwaway repositories.
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;

mod util;

use util::{edit_json, make_repo, read};

// Binary rooted at the fixture, internal engine, no colours
fn diffdev(repo: &assert_fs::TempDir) -> Command
{
    let mut cmd = Command::cargo_bin("diffdev").expect("bin");
    cmd.current_dir(repo.path())
        .env_remove("DIFFDEV_LOG")
        .args(["--no-color", "--engine", "internal", "--repo-root"])
        .arg(repo.path());
    cmd
}

fn write_response(
    repo: &assert_fs::TempDir,
    body: &str,
) -> std::path::PathBuf
{
    let child = repo.child("response.txt");
    child
        .write_str(body)
        .expect("write response");
    child
        .path()
        .to_path_buf()
}

#[test]
fn preview_prints_patch_without_writing()
{
    let repo = make_repo();
    let response = write_response(&repo, &edit_json(&[("a.py", &["    return 1"], &["    return 2"])]));

    diffdev(&repo)
        .args(["preview", "--response"])
        .arg(&response)
        .assert()
        .success()
        .stdout(predicate::str::contains("--- a/a.py"))
        .stdout(predicate::str::contains("+    return 2"))
        .stderr(predicate::str::contains("1 file(s) changed"));

    assert_eq!(read(repo.path(), "a.py"), "def f():\n    return 1\n");
    assert!(!repo.path().join(".diffdev").exists());
}

#[test]
fn apply_list_and_revert_across_processes()
{
    let repo = make_repo();
    let response = write_response(&repo, &edit_json(&[("a.py", &["    return 1"], &["    return 2"])]));

    diffdev(&repo)
        .args(["apply", "--response"])
        .arg(&response)
        .assert()
        .success()
        .stderr(predicate::str::contains("engine=internal"));
    assert_eq!(read(repo.path(), "a.py"), "def f():\n    return 2\n");

    let out = diffdev(&repo)
        .args(["checkpoints", "list", "--json"])
        .output()
        .expect("run list");
    assert!(out.status.success());
    let rows: Value = serde_json::from_slice(&out.stdout).expect("json");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "applied");
    assert_eq!(rows[0]["engine"], "internal");

    diffdev(&repo)
        .arg("revert")
        .assert()
        .success()
        .stderr(predicate::str::contains("a.py"));
    assert_eq!(read(repo.path(), "a.py"), "def f():\n    return 1\n");

    // Nothing left to revert
    diffdev(&repo)
        .arg("revert")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("no checkpoint available"));
}

#[test]
fn exit_codes_follow_failure_class()
{
    let repo = make_repo();

    let malformed = write_response(&repo, "Sorry, I can't do that.");
    diffdev(&repo)
        .args(["apply", "--response"])
        .arg(&malformed)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("malformed edit document"));

    let missing = write_response(&repo, &edit_json(&[("a.py", &["    return 7"], &["    return 8"])]));
    diffdev(&repo)
        .args(["apply", "--response"])
        .arg(&missing)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("search block not found in a.py"));

    assert_eq!(read(repo.path(), "a.py"), "def f():\n    return 1\n");
}

#[test]
fn ask_without_credential_fails_before_any_request()
{
    let repo = make_repo();
    diffdev(&repo)
        .env_remove("ANTHROPIC_API_KEY")
        .args(["ask", "make it return 2", "a.py"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("ANTHROPIC_API_KEY"));
}

#[test]
fn context_renders_selected_files()
{
    let repo = make_repo();
    diffdev(&repo)
        .args(["context", "a.py", "pkg", "--instruction", "rename helper"])
        .assert()
        .success()
        .stdout(predicate::str::contains("File: a.py\n```\ndef f():\n    return 1\n```"))
        .stdout(predicate::str::contains("File: pkg/util.py"))
        .stdout(predicate::str::contains("Instruction:\nrename helper"));

    diffdev(&repo)
        .args(["context", "nope.py"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("nope.py"));
}

#[test]
fn copydir_to_stdout()
{
    let repo = make_repo();
    diffdev(&repo)
        .args(["copydir", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("├── pkg"))
        .stdout(predicate::str::contains("1 | def f():"));
}

#[test]
fn init_writes_config_once()
{
    let repo = assert_fs::TempDir::new().expect("tempdir");
    diffdev(&repo)
        .arg("init")
        .arg(repo.path())
        .assert()
        .success();

    let cfg = std::fs::read_to_string(repo.path().join("diffdev.toml")).expect("config");
    assert!(cfg.contains("[apply]"));
    assert!(cfg.contains("context_lines = 3"));

    diffdev(&repo)
        .arg("init")
        .arg(repo.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}
