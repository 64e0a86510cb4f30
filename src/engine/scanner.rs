// FILE: src/engine/scanner.rs
//! Directory scanner: one full pass over the watched roots followed by a
//! stale-entry sweep.
//!
//! The pass is the only place where scan-driven index mutations happen.
//! Deletions are detected solely by the sweep, so their latency is bounded
//! by the monitor interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use crate::engine::{ContentIdentifier, InstanceSink};
use crate::error::Result;
use crate::storage::{BoundedFileView, FileStatus, PersistentIndex, UpsertOutcome};

/// Counters for a single pass, logged when the pass ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub visited: u64,
    pub new: u64,
    pub modified: u64,
    pub unchanged: u64,
    pub recognized: u64,
    pub ingested: u64,
    pub ingest_failures: u64,
    pub retracted: u64,
    pub removed: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

pub struct DirectoryScanner {
    roots: Vec<PathBuf>,
    index: Arc<PersistentIndex>,
    identifier: Arc<dyn ContentIdentifier>,
    sink: Arc<dyn InstanceSink>,
}

impl DirectoryScanner {
    pub fn new(
        roots: Vec<PathBuf>,
        index: Arc<PersistentIndex>,
        identifier: Arc<dyn ContentIdentifier>,
        sink: Arc<dyn InstanceSink>,
    ) -> Self {
        Self { roots, index, identifier, sink }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Walk every root, then sweep records whose files are gone. Returns
    /// early (with `cancelled` set) as soon as `token` fires.
    pub fn scan_pass(&self, token: &CancellationToken) -> ScanStats {
        let mut stats = ScanStats::default();

        self.walk_roots(token, &mut stats);

        if !stats.cancelled {
            if let Err(e) = self.sweep_stale(token, &mut stats) {
                tracing::error!("[Scanner] Stale-entry sweep failed: {}", e);
            }
        }

        if stats.cancelled {
            tracing::info!("[Scanner] Pass cancelled after {} files", stats.visited);
        } else {
            tracing::info!(
                "[Scanner] Pass complete: {} files ({} new, {} modified, {} unchanged), {} ingested, {} retracted, {} removed",
                stats.visited, stats.new, stats.modified, stats.unchanged,
                stats.ingested, stats.retracted, stats.removed
            );
        }
        stats
    }

    fn walk_roots(&self, token: &CancellationToken, stats: &mut ScanStats) {
        for root in &self.roots {
            // WalkDir keeps its own stack of open directories, so deep trees
            // never grow the call stack
            for entry in WalkDir::new(root).follow_links(true) {
                if token.is_cancelled() {
                    stats.cancelled = true;
                    return;
                }

                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let at = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                        tracing::warn!("[Scanner] Cannot read directory {}: {}", at, e);
                        stats.skipped += 1;
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                // The file may vanish between listing and stat
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!("[Scanner] Skipping {}: {}", entry.path().display(), e);
                        stats.skipped += 1;
                        continue;
                    }
                };

                let mtime = metadata.modified().ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);

                stats.visited += 1;
                if let Err(e) = self.process_file(entry.path(), mtime, metadata.len(), stats) {
                    tracing::error!("[Scanner] Failed to process {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    /// Classify one file and apply the index/sink side effects.
    pub fn process_file(&self, path: &Path, mtime: u64, size: u64, stats: &mut ScanStats) -> Result<()> {
        let abs_path = path.to_string_lossy().to_string();
        let classification = self.index.classify_file(&abs_path, mtime, size)?;

        match classification.status {
            FileStatus::Unchanged => {
                stats.unchanged += 1;
                return Ok(());
            }
            FileStatus::New => stats.new += 1,
            FileStatus::Modified => stats.modified += 1,
        }

        // Read into memory rather than mapping: files in watched folders may
        // be truncated mid-scan, and a shrinking mapping faults the process
        let content = match BoundedFileView::open_buffered(path, 0, 0) {
            Ok(view) => Some(view),
            Err(e) => {
                tracing::warn!("[Scanner] Cannot read {}: {}", abs_path, e);
                None
            }
        };

        let recognized = content.as_ref()
            .and_then(|view| self.identifier.identify_bytes(view).map(|id| (view, id)));

        match &recognized {
            Some(_) => {
                tracing::info!("[Scanner] New DICOM file detected: {}", abs_path);
                stats.recognized += 1;
            }
            None => tracing::debug!("[Scanner] Skipping indexing of non-DICOM file: {}", abs_path),
        }

        // The old record is replaced before anything is retracted, so two
        // copies of one instance never leave zero live records behind
        let content_id = recognized.as_ref().map(|(_, id)| id.as_str());
        let replacement = self.index.replace_file(&abs_path, mtime, size, content_id)?;

        if let Some(old) = &replacement.orphaned_content_id {
            self.retract(old, stats);
        }

        match (replacement.outcome, recognized) {
            (Some(UpsertOutcome::Primary), Some((view, _))) => self.ingest(path, view, stats),
            (Some(UpsertOutcome::Duplicate), _) => {
                tracing::debug!("[Scanner] {} duplicates an indexed instance, not ingesting", abs_path);
            }
            _ => {}
        }
        Ok(())
    }

    /// Drop records whose backing file is no longer a regular file and
    /// retract the content they carried.
    pub fn sweep_stale(&self, token: &CancellationToken, stats: &mut ScanStats) -> Result<()> {
        for record in self.index.files()? {
            if token.is_cancelled() {
                stats.cancelled = true;
                return Ok(());
            }
            if record.path().is_file() {
                continue;
            }

            match self.index.remove_file(&record.abs_path) {
                Ok(carried_content) => {
                    stats.removed += 1;
                    tracing::debug!("[Scanner] Dropped stale record {}", record);
                    if carried_content {
                        if let Some(content_id) = &record.content_id {
                            tracing::info!("[Scanner] Indexed DICOM file was removed: {}", record.abs_path);
                            self.retract(content_id, stats);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("[Scanner] Failed to drop stale record {}: {}", record.abs_path, e);
                }
            }
        }
        Ok(())
    }

    fn ingest(&self, path: &Path, bytes: &[u8], stats: &mut ScanStats) {
        match self.sink.ingest(path, bytes) {
            Ok(()) => stats.ingested += 1,
            Err(e) => {
                // Not retried: the record stays indexed with its current
                // (mtime, size), so later passes see it as unchanged
                stats.ingest_failures += 1;
                tracing::warn!("[Scanner] Ingestion of {} failed: {}", path.display(), e);
            }
        }
    }

    fn retract(&self, content_id: &str, stats: &mut ScanStats) {
        match self.sink.retract(content_id) {
            Ok(()) => stats.retracted += 1,
            Err(e) => tracing::warn!("[Scanner] Retraction of {} failed: {}", content_id, e),
        }
    }
}
