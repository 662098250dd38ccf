//! Checkpoint store: pre-apply snapshots of every file a patch touches.
//!
//! Layout under `<repo>/.diffdev/checkpoints`:
//!
//! ```text
//! tmp/<ID>/            staging, renamed into place once complete
//! <ID>/manifest.json   files, existence, checksums, status
//! <ID>/files/<path>    snapshot bytes of files that existed
//! <ID>/patch.diff      the patch this checkpoint guards
//! <ID>/DONE            completeness marker
//! index.jsonl          append-only listing, written under a lock
//! ```

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use crate::infra::utils::{normalize_repo_rel, sync_dir, write_atomic};

/// Lifecycle of a checkpoint's patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// Snapshot taken, apply not finished
    Pending,
    Applied,
    Reverted,
    /// Apply was rejected or rolled back
    Failed,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::Applied => "applied",
            CheckpointStatus::Reverted => "reverted",
            CheckpointStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-file record in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: PathBuf, // repo-relative
    pub existed: bool,
    pub size_bytes: u64,
    pub checksum: Option<String>, // blake3:<hex> of the snapshot
    /// Highest ancestor directory created by the apply, removed on restore
    pub created_dir: Option<PathBuf>,
    /// Checksum of the file right after apply, `None` if absent
    pub applied_checksum: Option<String>,
}

/// Git state at checkpoint time (best-effort).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSnapshot {
    pub commit: String,
    pub branch: Option<String>,
    pub dirty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub id: String,        // e.g., 2025-08-14T10-30-15.123456Z_a9Jh5kL2Qx
    pub timestamp: String, // RFC3339 creation time
    pub engine: String,    // "internal" | "git"
    pub status: CheckpointStatus,
    pub summary: String,
    pub git: Option<GitSnapshot>,
    pub last_updated: String,
    pub files: Vec<FileSnapshot>,
}

/// Lightweight index record for quick listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub timestamp: String,
    pub files: usize,
    pub engine: String,
}

/// Opaque handle on a stored checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointToken {
    id: String,
}

impl CheckpointToken {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Listing row
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub timestamp: String,
    pub engine: String,
    pub status: CheckpointStatus,
    pub summary: String,
    pub files: Vec<String>,
}

/// Cleanup selection; both bounds may be combined
#[derive(Debug, Default)]
pub struct CleanupRequest {
    pub older_than: Option<String>,
    pub keep_latest: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupResult {
    pub removed: Vec<String>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    repo_root: PathBuf,
    dir: PathBuf,       // .../.diffdev/checkpoints
    locks_dir: PathBuf, // .../.diffdev/locks
}

impl CheckpointStore {
    pub fn new(repo_root: &Path) -> Self {
        let base = repo_root.join(".diffdev");
        Self {
            repo_root: repo_root.to_path_buf(),
            dir: base.join("checkpoints"),
            locks_dir: base.join("locks"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot `paths` (repo-relative) before `patch_text` is applied.
    #[tracing::instrument(level = "debug", skip(self, patch_text), fields(files = paths.len()))]
    pub fn create(
        &self,
        paths: &[PathBuf],
        engine: &str,
        summary: &str,
        patch_text: &str,
    ) -> Result<CheckpointToken> {
        let tmp_root = self.dir.join("tmp");
        fs::create_dir_all(&tmp_root)
            .with_context(|| format!("create checkpoint dir: {}", tmp_root.display()))?;
        fs::create_dir_all(&self.locks_dir)
            .with_context(|| format!("create locks dir: {}", self.locks_dir.display()))?;

        let id = generate_checkpoint_id();
        let staging = tmp_root.join(&id);
        let final_dir = self.dir.join(&id);
        fs::create_dir_all(staging.join("files"))
            .with_context(|| format!("create staging: {}", staging.display()))?;

        let staged = self.stage(&staging, &id, paths, engine, summary, patch_text);
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        fs::rename(&staging, &final_dir).with_context(|| {
            format!("rename {} → {}", staging.display(), final_dir.display())
        })?;
        let _ = sync_dir(&self.dir);

        let done_path = final_dir.join("DONE");
        fs::write(&done_path, "")
            .with_context(|| format!("create DONE: {}", done_path.display()))?;
        File::open(&done_path)?.sync_all().ok();
        let _ = sync_dir(&final_dir);

        self.append_to_index(&IndexEntry {
            id: id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            files: paths.len(),
            engine: engine.to_string(),
        })?;

        tracing::debug!(%id, "checkpoint stored");
        Ok(CheckpointToken { id })
    }

    fn stage(
        &self,
        staging: &Path,
        id: &str,
        paths: &[PathBuf],
        engine: &str,
        summary: &str,
        patch_text: &str,
    ) -> Result<()> {
        let mut files = Vec::with_capacity(paths.len());

        for raw in paths {
            let rel = normalize_repo_rel(raw)?;
            let source = self.repo_root.join(&rel);

            let meta = match fs::symlink_metadata(&source) {
                Ok(m) => Some(m),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(e).with_context(|| format!("stat source: {}", source.display()));
                }
            };

            let Some(meta) = meta else {
                files.push(FileSnapshot {
                    created_dir: first_missing_ancestor(&self.repo_root, &rel),
                    path: rel,
                    existed: false,
                    size_bytes: 0,
                    checksum: None,
                    applied_checksum: None,
                });
                continue;
            };

            if !(meta.is_file() || meta.file_type().is_symlink()) {
                bail!("unsupported file type for checkpoint: {}", rel.display());
            }

            // Symlinks are snapshotted by target content
            let bytes = fs::read(&source)
                .with_context(|| format!("read for checkpoint: {}", source.display()))?;
            let dest = staging.join("files").join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create snapshot parent: {}", parent.display()))?;
            }
            fs::write(&dest, &bytes)
                .with_context(|| format!("write snapshot: {}", dest.display()))?;

            files.push(FileSnapshot {
                path: rel,
                existed: true,
                size_bytes: bytes.len() as u64,
                checksum: Some(checksum(&bytes)),
                created_dir: None,
                applied_checksum: None,
            });
        }

        fs::write(staging.join("patch.diff"), patch_text).context("write patch.diff")?;

        let now = Utc::now().to_rfc3339();
        let manifest = CheckpointManifest {
            id: id.to_string(),
            timestamp: now.clone(),
            engine: engine.to_string(),
            status: CheckpointStatus::Pending,
            summary: summary.to_string(),
            git: capture_git_snapshot(&self.repo_root),
            last_updated: now,
            files,
        };
        write_manifest(staging, &manifest)
    }

    /// Manifest of a complete checkpoint (DONE present)
    pub fn manifest(&self, id: &str) -> Result<CheckpointManifest> {
        let base = self.dir.join(id);
        if !base.join("DONE").exists() {
            bail!("checkpoint {id} is incomplete (missing DONE)");
        }
        let path = base.join("manifest.json");
        let s = fs::read_to_string(&path)
            .with_context(|| format!("read manifest: {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse manifest: {}", path.display()))
    }

    /// Stored patch text
    pub fn patch_text(&self, id: &str) -> Result<String> {
        let path = self.dir.join(id).join("patch.diff");
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn set_status(&self, token: &CheckpointToken, status: CheckpointStatus) -> Result<()> {
        let mut manifest = self.manifest(&token.id)?;
        manifest.status = status;
        if status == CheckpointStatus::Applied {
            for f in &mut manifest.files {
                f.applied_checksum = fs::read(self.repo_root.join(&f.path))
                    .ok()
                    .map(|b| checksum(&b));
            }
        }
        manifest.last_updated = Utc::now().to_rfc3339();
        write_manifest(&self.dir.join(&token.id), &manifest)
    }

    /// Files whose current bytes differ from what the apply wrote
    pub fn drifted_files(&self, token: &CheckpointToken) -> Result<Vec<PathBuf>> {
        let manifest = self.manifest(&token.id)?;
        Ok(manifest
            .files
            .into_iter()
            .filter(|f| {
                let now = fs::read(self.repo_root.join(&f.path))
                    .ok()
                    .map(|b| checksum(&b));
                now != f.applied_checksum
            })
            .map(|f| f.path)
            .collect())
    }

    /// Write every snapshot back byte-for-byte; files that did not exist
    /// are removed. Returns the restored paths.
    #[tracing::instrument(level = "debug", skip(self), fields(id = token.id()))]
    pub fn restore(&self, token: &CheckpointToken) -> Result<Vec<PathBuf>> {
        let manifest = self.manifest(&token.id)?;
        let snapshot_root = self.dir.join(&token.id).join("files");

        // Verify every snapshot before touching the tree
        let mut planned = Vec::with_capacity(manifest.files.len());
        for f in &manifest.files {
            if f.existed {
                let src = snapshot_root.join(&f.path);
                let bytes =
                    fs::read(&src).with_context(|| format!("read snapshot: {}", src.display()))?;
                if f.checksum.as_deref() != Some(checksum(&bytes).as_str()) {
                    bail!("snapshot checksum mismatch for {}", f.path.display());
                }
                planned.push((f, Some(bytes)));
            } else {
                planned.push((f, None));
            }
        }

        let mut restored = Vec::with_capacity(planned.len());
        for (f, bytes) in planned {
            let target = self.repo_root.join(&f.path);
            match bytes {
                Some(bytes) => write_atomic(&target, &bytes)?,
                None => {
                    match fs::remove_file(&target) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(e)
                                .with_context(|| format!("remove created {}", target.display()));
                        }
                    }
                    if let Some(dir) = &f.created_dir {
                        remove_empty_dirs(&self.repo_root, &f.path, dir);
                    }
                }
            }
            restored.push(f.path.clone());
        }

        Ok(restored)
    }

    /// Newest checkpoint whose patch is currently applied
    pub fn latest_applied(&self) -> Result<Option<CheckpointToken>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|c| c.status == CheckpointStatus::Applied)
            .map(|c| CheckpointToken { id: c.id }))
    }

    /// Complete checkpoints, newest first
    pub fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let mut entries = self.read_index()?;
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries.dedup_by(|a, b| a.id == b.id);

        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            let Ok(m) = self.manifest(&e.id) else {
                continue;
            };
            out.push(CheckpointInfo {
                id: m.id,
                timestamp: m.timestamp,
                engine: m.engine,
                status: m.status,
                summary: m.summary,
                files: m
                    .files
                    .iter()
                    .map(|f| f.path.display().to_string())
                    .collect(),
            });
        }
        Ok(out)
    }

    /// Remove checkpoints older than a relative bound and/or beyond the
    /// newest `keep_latest`. The newest applied checkpoint is always kept.
    pub fn cleanup(&self, req: &CleanupRequest) -> Result<CleanupResult> {
        let bound = match &req.older_than {
            Some(s) => Some(parse_time_bound(s)?),
            None => None,
        };
        let keep_applied = self.latest_applied()?.map(|t| t.id);

        let mut result = CleanupResult::default();
        for (i, info) in self.list()?.into_iter().enumerate() {
            if keep_applied.as_deref() == Some(info.id.as_str()) {
                continue;
            }
            let too_many = req.keep_latest.is_some_and(|k| i >= k);
            let too_old = bound.is_some_and(|b| {
                DateTime::parse_from_rfc3339(&info.timestamp)
                    .map(|t| t.with_timezone(&Utc) < b)
                    .unwrap_or(false)
            });
            let selected = match (req.keep_latest.is_some(), bound.is_some()) {
                (true, true) => too_many || too_old,
                (true, false) => too_many,
                (false, true) => too_old,
                (false, false) => false,
            };
            if !selected {
                continue;
            }

            let dir = self.dir.join(&info.id);
            let size = dir_size(&dir);
            if !req.dry_run
                && let Err(e) = fs::remove_dir_all(&dir)
            {
                result.errors.push(format!("{}: {e}", info.id));
                continue;
            }
            result.bytes_freed += size;
            result.removed.push(info.id);
        }

        Ok(result)
    }

    fn read_index(&self) -> Result<Vec<IndexEntry>> {
        let index_path = self.dir.join("index.jsonl");
        if !index_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&index_path)
            .with_context(|| format!("open index: {}", index_path.display()))?;
        let reader = BufReader::new(file);

        let mut out = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("read index line {}", i + 1))?;
            let t = line.trim();
            if t.is_empty() {
                continue;
            }
            match serde_json::from_str::<IndexEntry>(t) {
                Ok(e) => out.push(e),
                Err(_) => continue, // tolerate partial/corrupt lines
            }
        }
        Ok(out)
    }

    fn append_to_index(&self, entry: &IndexEntry) -> Result<()> {
        let index_path = self.dir.join("index.jsonl");
        let lock_path = self.locks_dir.join("checkpoints.lock");
        let _guard = acquire_lock(&lock_path)?;

        let line = serde_json::to_string(entry).context("serialize index entry")?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("open index: {}", index_path.display()))?;
        writeln!(f, "{line}").context("append index")?;
        f.sync_all().ok();

        Ok(())
    }
}

fn write_manifest(dir: &Path, manifest: &CheckpointManifest) -> Result<()> {
    let text = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    write_atomic(&dir.join("manifest.json"), text.as_bytes())
}

fn checksum(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}

/// Highest missing directory on the way to `rel`, if any
fn first_missing_ancestor(root: &Path, rel: &Path) -> Option<PathBuf> {
    let parent = rel.parent()?;
    let mut acc = PathBuf::new();
    for comp in parent.components() {
        acc.push(comp);
        if !root.join(&acc).exists() {
            return Some(acc);
        }
    }
    None
}

/// Remove now-empty directories from `rel`'s parent up to `stop`
fn remove_empty_dirs(root: &Path, rel: &Path, stop: &Path) {
    let mut cur = rel.parent();
    while let Some(dir) = cur {
        if dir.as_os_str().is_empty() || fs::remove_dir(root.join(dir)).is_err() {
            break;
        }
        if dir == stop {
            break;
        }
        cur = dir.parent();
    }
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| match e.metadata() {
            Ok(m) if m.is_dir() => dir_size(&e.path()),
            Ok(m) => m.len(),
            Err(_) => 0,
        })
        .sum()
}

/// Sortable, filesystem-safe checkpoint ID.
fn generate_checkpoint_id() -> String {
    let ts = Utc::now().format("%Y-%m-%dT%H-%M-%S%.6fZ").to_string();
    let alphabet = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..10)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect();
    format!("{}_{}", ts, suffix)
}

/// Best-effort; `None` outside a git work tree.
fn capture_git_snapshot(repo_root: &Path) -> Option<GitSnapshot> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let branch = std::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(repo_root)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| s != "HEAD");

    let dirty = std::process::Command::new("git")
        .args(["diff", "--quiet"])
        .current_dir(repo_root)
        .status()
        .map(|s| !s.success())
        .unwrap_or(false);

    Some(GitSnapshot {
        commit,
        branch,
        dirty,
    })
}

/// Simple file lock; the guard deletes the lock on drop.
struct LockGuard {
    path: PathBuf,
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(lock_path: &Path) -> Result<LockGuard> {
    let open = || {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
    };

    let file = match open() {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Locks older than 60s are considered stale
            let stale = fs::metadata(lock_path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age.as_secs() > 60);
            if !stale {
                return Err(anyhow::Error::new(e)
                    .context(format!("acquire lock: {}", lock_path.display())));
            }
            let _ = fs::remove_file(lock_path);
            open().with_context(|| {
                format!("acquire lock after stale cleanup: {}", lock_path.display())
            })?
        }
        Err(e) => {
            return Err(
                anyhow::Error::new(e).context(format!("acquire lock: {}", lock_path.display()))
            );
        }
    };

    let mut file = file;
    writeln!(file, "pid={}", std::process::id()).ok();
    file.sync_all().ok();
    Ok(LockGuard {
        path: lock_path.to_path_buf(),
        file,
    })
}

/// Parse a cleanup bound: an RFC3339 timestamp, or a span back from now
/// such as "7d", "24h" or "2w"
pub fn parse_time_bound(time_str: &str) -> Result<DateTime<Utc>> {
    let time_str = time_str.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(time_str) {
        return Ok(at.with_timezone(&Utc));
    }

    let Some(unit) = time_str.chars().last() else {
        bail!("Empty time specification");
    };
    let number_str = &time_str[..time_str.len() - unit.len_utf8()];

    let number: i64 = number_str
        .parse()
        .with_context(|| format!("Invalid number '{}' in time specification", number_str))?;
    if number < 0 {
        bail!("Negative durations are not allowed: '{}'", time_str);
    }

    let duration = match unit {
        'w' => Duration::try_weeks(number),
        'd' => Duration::try_days(number),
        'h' => Duration::try_hours(number),
        'm' => Duration::try_minutes(number),
        's' => Duration::try_seconds(number),
        _ => bail!("Invalid time unit in '{}'. Use w, d, h, m, or s", time_str),
    };
    let Some(duration) = duration else {
        bail!("Duration out of range: '{}'", time_str);
    };

    Utc::now()
        .checked_sub_signed(duration)
        .with_context(|| format!("Duration out of range: '{}'", time_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tick() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    fn store_with(files: &[(&str, &str)]) -> (TempDir, CheckpointStore) {
        let tmp = TempDir::new().unwrap();
        for (p, c) in files {
            let path = tmp.path().join(p);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, c).unwrap();
        }
        let store = CheckpointStore::new(tmp.path());
        (tmp, store)
    }

    #[test]
    fn restore_is_byte_identical_and_removes_created_files() {
        let (tmp, store) = store_with(&[("a.py", "def f():\r\n    return 1")]);
        let token = store
            .create(
                &["a.py".into(), "new/dir/b.py".into()],
                "internal",
                "test",
                "",
            )
            .unwrap();

        fs::write(tmp.path().join("a.py"), "changed").unwrap();
        fs::create_dir_all(tmp.path().join("new/dir")).unwrap();
        fs::write(tmp.path().join("new/dir/b.py"), "created").unwrap();

        let restored = store.restore(&token).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            fs::read(tmp.path().join("a.py")).unwrap(),
            b"def f():\r\n    return 1"
        );
        assert!(!tmp.path().join("new/dir/b.py").exists());
        assert!(!tmp.path().join("new").exists());
    }

    #[test]
    fn status_transitions_drive_latest_applied() {
        let (_tmp, store) = store_with(&[("x.txt", "x")]);
        let first = store.create(&["x.txt".into()], "internal", "one", "").unwrap();
        store.set_status(&first, CheckpointStatus::Applied).unwrap();
        tick();
        let second = store.create(&["x.txt".into()], "internal", "two", "").unwrap();
        store.set_status(&second, CheckpointStatus::Failed).unwrap();

        assert_eq!(store.latest_applied().unwrap(), Some(first.clone()));

        store.set_status(&first, CheckpointStatus::Reverted).unwrap();
        assert_eq!(store.latest_applied().unwrap(), None);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id());
    }

    #[test]
    fn drift_is_detected_after_apply() {
        let (tmp, store) = store_with(&[("x.txt", "x")]);
        let token = store.create(&["x.txt".into()], "internal", "", "").unwrap();
        fs::write(tmp.path().join("x.txt"), "applied").unwrap();
        store.set_status(&token, CheckpointStatus::Applied).unwrap();
        assert!(store.drifted_files(&token).unwrap().is_empty());

        fs::write(tmp.path().join("x.txt"), "edited by hand").unwrap();
        assert_eq!(
            store.drifted_files(&token).unwrap(),
            vec![PathBuf::from("x.txt")]
        );
    }

    #[test]
    fn corrupted_snapshot_refuses_restore() {
        let (tmp, store) = store_with(&[("x.txt", "x")]);
        let token = store.create(&["x.txt".into()], "internal", "", "").unwrap();
        fs::write(store.dir().join(token.id()).join("files/x.txt"), "tampered").unwrap();
        fs::write(tmp.path().join("x.txt"), "current").unwrap();

        assert!(store.restore(&token).is_err());
        assert_eq!(fs::read_to_string(tmp.path().join("x.txt")).unwrap(), "current");
    }

    #[test]
    fn cleanup_keeps_latest_and_applied() {
        let (_tmp, store) = store_with(&[("x.txt", "x")]);
        let applied = store.create(&["x.txt".into()], "git", "", "").unwrap();
        store.set_status(&applied, CheckpointStatus::Applied).unwrap();
        for _ in 0..3 {
            tick();
            store.create(&["x.txt".into()], "git", "", "").unwrap();
        }

        let dry = store
            .cleanup(&CleanupRequest {
                keep_latest: Some(1),
                dry_run: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(dry.removed.len(), 2);
        assert_eq!(store.list().unwrap().len(), 4);

        store
            .cleanup(&CleanupRequest {
                keep_latest: Some(1),
                ..Default::default()
            })
            .unwrap();
        let left: Vec<_> = store.list().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&applied.id().to_string()));
    }

    #[test]
    fn test_parse_time_bound() {
        let base_time = Utc::now();

        let result = parse_time_bound("7d").unwrap();
        let expected = base_time - Duration::days(7);
        assert!((result - expected).num_seconds().abs() < 5);

        let result = parse_time_bound("2w").unwrap();
        let expected = base_time - Duration::days(14);
        assert!((result - expected).num_seconds().abs() < 5);

        let at = parse_time_bound("2025-08-14T10:30:15Z").unwrap();
        assert_eq!(at.to_rfc3339(), "2025-08-14T10:30:15+00:00");

        assert!(parse_time_bound("-7d").is_err());
        assert!(parse_time_bound("abc").is_err());
        assert!(parse_time_bound("7x").is_err());
        assert!(parse_time_bound("").is_err());
        assert!(parse_time_bound("99999999999999w").is_err());
    }
}
