//! Content-addressed backup store and integrity manager.
//!
//! Layout under the store root:
//!
//! ```text
//! objects/<sha256>/   snapshot of a module source tree, keyed by tree hash
//! index.json          append-only list of BackupRecords
//! ORIGINAL            hash of the original (first-ever) backup
//! work/               clean-copy workspaces handed to the builder
//! ```
//!
//! Workspaces live until the next run sweeps them or their backup is pruned.
//!
//! Every mutation is staged in a temporary sibling and renamed into place, so
//! a concurrent reader sees either the old or the new state, never a partial one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::IntegrityError;
use crate::integrity::hash::{copy_tree, hash_tree};
use crate::models::BackupRecord;

const INDEX_FILE: &str = "index.json";
const ORIGINAL_MARKER: &str = "ORIGINAL";
const OBJECTS_DIR: &str = "objects";
const WORK_DIR: &str = "work";

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackupIndex {
    next_id: u64,
    records: Vec<BackupRecord>,
}

/// Unpatched working copy extracted from a backup.
///
/// Removed on drop unless [`CleanCopy::keep`] was called, so an aborted or
/// failed target never leaves a half-used workspace behind.
#[derive(Debug)]
pub struct CleanCopy {
    path: PathBuf,
    keep: bool,
}

impl CleanCopy {
    fn new(path: PathBuf) -> Self {
        CleanCopy { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the workspace over; it is no longer removed on drop.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for CleanCopy {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("[Integrity] Discarded workspace {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "[Integrity] Failed to discard workspace {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Owner of the backup store.
#[derive(Debug)]
pub struct IntegrityManager {
    root: PathBuf,
    retention: usize,
    index: BackupIndex,
    pinned: HashSet<u64>,
}

impl IntegrityManager {
    /// Open (or initialize) the store at `root`, retaining `retention`
    /// non-original backups.
    pub fn open(root: impl Into<PathBuf>, retention: usize) -> Result<Self, IntegrityError> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(WORK_DIR))?;

        let index_path = root.join(INDEX_FILE);
        let mut index = if index_path.exists() {
            let content = fs::read_to_string(&index_path)?;
            serde_json::from_str::<BackupIndex>(&content)
                .map_err(|e| IntegrityError::IndexCorrupt(format!("{}: {}", index_path.display(), e)))?
        } else {
            BackupIndex::default()
        };

        // the marker file wins over per-record flags
        let marker = root.join(ORIGINAL_MARKER);
        if let Ok(original_hash) = fs::read_to_string(&marker) {
            let original_hash = original_hash.trim();
            for record in &mut index.records {
                record.is_original = record.hash == original_hash;
            }
        }

        let mut manager = IntegrityManager {
            root,
            retention,
            index,
            pinned: HashSet::new(),
        };

        if let Some(original) = manager.original().cloned() {
            if !marker.exists() {
                manager.write_marker(&original.hash)?;
            }
        }

        log::debug!(
            "[Integrity] Opened backup store {} ({} records)",
            manager.root.display(),
            manager.index.records.len()
        );
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[BackupRecord] {
        &self.index.records
    }

    /// The factory-state backup, if any backup was ever taken.
    pub fn original(&self) -> Option<&BackupRecord> {
        self.index.records.iter().find(|r| r.is_original)
    }

    pub fn latest(&self) -> Option<&BackupRecord> {
        self.index.records.iter().max_by_key(|r| r.id)
    }

    pub fn find(&self, id: u64) -> Option<&BackupRecord> {
        self.index.records.iter().find(|r| r.id == id)
    }

    /// Protect a record from pruning while a plan references it.
    pub fn pin(&mut self, id: u64) {
        self.pinned.insert(id);
    }

    pub fn unpin(&mut self, id: u64) {
        self.pinned.remove(&id);
    }

    /// Back up `tree` unless a record with identical content already exists.
    pub fn ensure_backup(&mut self, tree: &Path) -> Result<BackupRecord, IntegrityError> {
        if !tree.is_dir() {
            return Err(IntegrityError::SourceMissing(tree.to_path_buf()));
        }

        let digest = hash_tree(tree)?;
        if let Some(existing) = self.index.records.iter().find(|r| r.hash == digest.hash) {
            log::debug!(
                "[Integrity] Tree unchanged, reusing backup #{} ({})",
                existing.id,
                short(&existing.hash)
            );
            return Ok(existing.clone());
        }

        let location = self.snapshot(tree, &digest.hash)?;
        let is_original = self.original().is_none();

        let record = BackupRecord {
            id: self.index.next_id,
            created_at: Utc::now(),
            hash: digest.hash.clone(),
            is_original,
            location,
            file_count: digest.file_count,
        };

        self.index.next_id += 1;
        self.index.records.push(record.clone());
        self.save_index()?;
        if is_original {
            self.write_marker(&record.hash)?;
        }

        log::info!(
            "[Integrity] Created backup #{} ({}, {} files{})",
            record.id,
            short(&record.hash),
            record.file_count,
            if is_original { ", original" } else { "" }
        );

        self.prune_protecting(&[record.id])?;
        Ok(record)
    }

    /// Materialize an unpatched copy of `record` under `work/`.
    ///
    /// The snapshot is verified before it is copied.
    pub fn extract_clean_copy(
        &self,
        record: &BackupRecord,
        label: &str,
    ) -> Result<CleanCopy, IntegrityError> {
        if !record.location.is_dir() {
            return Err(IntegrityError::SourceMissing(record.location.clone()));
        }
        self.verify(&record.location, record)?;

        let work = self.root.join(WORK_DIR);
        fs::create_dir_all(&work)?;

        let name = format!(
            "{}-b{}-{}",
            sanitize(label),
            record.id,
            Utc::now().format("%Y%m%d%H%M%S%f")
        );
        let dest = work.join(name);

        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(&work)?;
        copy_tree(&record.location, staging.path())?;
        fs::rename(staging.path(), &dest)?;

        log::debug!(
            "[Integrity] Extracted backup #{} to {}",
            record.id,
            dest.display()
        );
        Ok(CleanCopy::new(dest))
    }

    /// Workspace directories currently under `work/`, including staging
    /// leftovers of interrupted extractions.
    pub fn workspaces(&self) -> Result<Vec<PathBuf>, IntegrityError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.root.join(WORK_DIR))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Remove a workspace handed out by [`IntegrityManager::extract_clean_copy`].
    pub fn discard_workspace(&self, path: &Path) -> Result<(), IntegrityError> {
        let work = self.root.join(WORK_DIR);
        if path.parent() != Some(work.as_path()) {
            return Err(IntegrityError::NotAWorkspace(path.to_path_buf()));
        }
        match fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::debug!("[Integrity] Discarded workspace {}", path.display());
        Ok(())
    }

    /// Remove every workspace under `work/`; returns how many were removed.
    pub fn sweep_workspaces(&self) -> Result<usize, IntegrityError> {
        let stale = self.workspaces()?;
        for path in &stale {
            self.discard_workspace(path)?;
        }
        if !stale.is_empty() {
            log::info!("[Integrity] Reclaimed {} stale workspace(s)", stale.len());
        }
        Ok(stale.len())
    }

    /// Recompute the hash of `location` and compare with `record`.
    pub fn verify(&self, location: &Path, record: &BackupRecord) -> Result<(), IntegrityError> {
        let digest = hash_tree(location)?;
        if digest.hash != record.hash {
            log::error!(
                "[Integrity] Verification failed for {}: expected {}, found {}",
                location.display(),
                short(&record.hash),
                short(&digest.hash)
            );
            return Err(IntegrityError::VerificationFailed {
                location: location.to_path_buf(),
                expected: record.hash.clone(),
                actual: digest.hash,
            });
        }
        Ok(())
    }

    /// Reinstate `record` as the live module source tree.
    pub fn restore(&self, record: &BackupRecord, live_tree: &Path) -> Result<(), IntegrityError> {
        self.verify(&record.location, record)?;

        let parent = live_tree
            .parent()
            .ok_or_else(|| IntegrityError::SourceMissing(live_tree.to_path_buf()))?;
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".vmod-restore-")
            .tempdir_in(parent)?;
        copy_tree(&record.location, staging.path())?;
        self.verify(staging.path(), record)?;

        let displaced = if live_tree.exists() {
            let old = parent.join(format!(
                ".vmod-displaced-{}",
                Utc::now().format("%Y%m%d%H%M%S%f")
            ));
            fs::rename(live_tree, &old)?;
            Some(old)
        } else {
            None
        };

        if let Err(e) = fs::rename(staging.path(), live_tree) {
            if let Some(old) = &displaced {
                // put the previous tree back so the live path never stays empty
                if let Err(undo) = fs::rename(old, live_tree) {
                    log::error!(
                        "[Integrity] Rollback failed, previous tree left at {}: {}",
                        old.display(),
                        undo
                    );
                }
            }
            return Err(e.into());
        }

        if let Some(old) = displaced {
            if let Err(e) = fs::remove_dir_all(&old) {
                log::warn!("[Integrity] Could not remove {}: {}", old.display(), e);
            }
        }

        log::info!(
            "[Integrity] Restored backup #{} to {}",
            record.id,
            live_tree.display()
        );
        Ok(())
    }

    /// Apply the retention policy; returns the removed records.
    pub fn prune(&mut self) -> Result<Vec<BackupRecord>, IntegrityError> {
        self.prune_protecting(&[])
    }

    fn prune_protecting(&mut self, extra: &[u64]) -> Result<Vec<BackupRecord>, IntegrityError> {
        let mut candidates: Vec<u64> = self
            .index
            .records
            .iter()
            .filter(|r| !r.is_original && !self.pinned.contains(&r.id) && !extra.contains(&r.id))
            .map(|r| r.id)
            .collect();
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        // protected records count toward the quota, newest first
        let protected_recent = self
            .index
            .records
            .iter()
            .filter(|r| !r.is_original && (self.pinned.contains(&r.id) || extra.contains(&r.id)))
            .count();
        let keep = self.retention.saturating_sub(protected_recent);

        let doomed: HashSet<u64> = candidates.into_iter().skip(keep).collect();
        if doomed.is_empty() {
            return Ok(Vec::new());
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.index.records)
            .into_iter()
            .partition(|r| doomed.contains(&r.id));
        self.index.records = kept;
        self.save_index()?;

        let live_hashes: HashSet<&str> =
            self.index.records.iter().map(|r| r.hash.as_str()).collect();
        for record in &removed {
            if live_hashes.contains(record.hash.as_str()) {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(&record.location) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "[Integrity] Could not remove snapshot {}: {}",
                        record.location.display(),
                        e
                    );
                }
            }
        }

        // workspaces extracted from a pruned backup go with it
        match self.workspaces() {
            Ok(paths) => {
                for path in paths {
                    let orphaned =
                        workspace_backup_id(&path).map_or(false, |id| doomed.contains(&id));
                    if orphaned {
                        if let Err(e) = self.discard_workspace(&path) {
                            log::warn!(
                                "[Integrity] Could not remove workspace {}: {}",
                                path.display(),
                                e
                            );
                        }
                    }
                }
            }
            Err(e) => log::warn!("[Integrity] Could not list workspaces: {}", e),
        }

        log::info!(
            "[Integrity] Pruned {} backup(s), {} remaining",
            removed.len(),
            self.index.records.len()
        );
        Ok(removed)
    }

    /// Copy `tree` into `objects/<hash>` unless an intact snapshot is there.
    fn snapshot(&self, tree: &Path, hash: &str) -> Result<PathBuf, IntegrityError> {
        let objects = self.root.join(OBJECTS_DIR);
        let dest = objects.join(hash);

        if dest.is_dir() {
            match hash_tree(&dest) {
                Ok(existing) if existing.hash == hash => return Ok(dest),
                _ => {
                    log::warn!(
                        "[Integrity] Replacing damaged snapshot {}",
                        dest.display()
                    );
                    fs::remove_dir_all(&dest)?;
                }
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&objects)?;
        copy_tree(tree, staging.path())?;

        // the live tree may have changed while it was copied
        let copied = hash_tree(staging.path())?;
        if copied.hash != hash {
            return Err(IntegrityError::VerificationFailed {
                location: tree.to_path_buf(),
                expected: hash.to_string(),
                actual: copied.hash,
            });
        }

        fs::rename(staging.path(), &dest)?;
        Ok(dest)
    }

    fn save_index(&self) -> Result<(), IntegrityError> {
        let json = serde_json::to_string_pretty(&self.index)
            .map_err(|e| IntegrityError::IndexCorrupt(e.to_string()))?;
        write_atomic(&self.root, &self.root.join(INDEX_FILE), json.as_bytes())
    }

    fn write_marker(&self, hash: &str) -> Result<(), IntegrityError> {
        write_atomic(
            &self.root,
            &self.root.join(ORIGINAL_MARKER),
            format!("{}\n", hash).as_bytes(),
        )
    }
}

/// Write `contents` to a temp file in `dir`, fsync, then rename over `path`.
pub(crate) fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), IntegrityError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IntegrityError::IoError(e.error))?;
    Ok(())
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

/// Backup id encoded in a `<label>-b<id>-<timestamp>` workspace name.
fn workspace_backup_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.rsplitn(3, '-');
    parts.next()?;
    parts.next()?.strip_prefix('b')?.parse().ok()
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
