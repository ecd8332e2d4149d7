//! Keeps the store in step with a directory tree.
//!
//! A file is re-indexed when its modification time is strictly newer than the
//! one recorded for its document. Each re-index runs as one transaction:
//! clear the old postings, record the new occurrences, finalize.

use crate::error::{Error, Result};
use crate::extract::{Extractor, FileExtractor};
use crate::store::Store;
use crate::tokenizer::tokenize;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// What happened to a single file during a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { entries: u64 },
    /// Not modified since the last index pass.
    Unchanged,
    /// Yielded no terms; the document stays cleared.
    Cleared,
    Unsupported,
    /// Another cycle is re-indexing the same path.
    Busy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub files_seen: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub cleared: usize,
    pub unsupported: usize,
    pub busy: usize,
    pub errors: usize,
    pub pruned: usize,
}

impl CrawlReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Indexed { .. } => self.indexed += 1,
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Cleared => self.cleared += 1,
            FileOutcome::Unsupported => self.unsupported += 1,
            FileOutcome::Busy => self.busy += 1,
        }
    }
}

pub struct Crawler<'a> {
    store: &'a Store,
    extractor: &'a dyn Extractor,
    cancel: Option<CancellationToken>,
}

impl<'a> Crawler<'a> {
    pub fn new(store: &'a Store, extractor: &'a dyn Extractor) -> Self {
        Self { store, extractor, cancel: None }
    }

    /// Stop between files once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Walk `root` recursively and re-index every stale file. Unreadable
    /// subtrees and symlink loops are logged and skipped.
    pub fn index_directory(&self, root: &Path) -> Result<CrawlReport> {
        if !root.is_dir() {
            return Err(Error::RootNotFound(root.to_path_buf()));
        }
        tracing::info!(root = %root.display(), "crawl started");

        let mut report = CrawlReport::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for entry in WalkDir::new(root).follow_links(true) {
            if self.cancelled() {
                tracing::info!(root = %root.display(), "crawl cancelled");
                return Err(Error::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    report.errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            report.files_seen += 1;
            let path = entry.path();
            seen.insert(path.to_path_buf());

            let modified = match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot read modification time");
                    report.errors += 1;
                    continue;
                }
            };
            match self.index_file(path, modified) {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to index file");
                    report.errors += 1;
                }
            }
        }

        report.pruned = self.prune_missing(root, &seen)?;
        tracing::info!(
            root = %root.display(),
            files_seen = report.files_seen,
            indexed = report.indexed,
            unchanged = report.unchanged,
            cleared = report.cleared,
            errors = report.errors,
            pruned = report.pruned,
            "crawl finished"
        );
        Ok(report)
    }

    /// Re-index `path` if `modified` is newer than what the store recorded.
    pub fn index_file(&self, path: &Path, modified: SystemTime) -> Result<FileOutcome> {
        if !self.extractor.supports(path) {
            tracing::debug!(path = %path.display(), "unsupported file type");
            return Ok(FileOutcome::Unsupported);
        }
        let Some(_claim) = self.store.claim_path(path) else {
            return Ok(FileOutcome::Busy);
        };
        let up_to_date = self
            .store
            .lookup_document(path)
            .and_then(|d| d.last_modified)
            .is_some_and(|indexed| modified <= indexed);
        if up_to_date {
            return Ok(FileOutcome::Unchanged);
        }

        let text = self.extractor.extract(path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "extraction failed, treating as empty");
            String::new()
        });
        let terms = tokenize(&text);

        let mut txn = self.store.transaction();
        txn.soft_delete_document(path)?;
        if terms.is_empty() {
            txn.commit();
            tracing::debug!(path = %path.display(), "no terms, left cleared");
            return Ok(FileOutcome::Cleared);
        }
        let doc_id = txn.upsert_document(path, modified)?;
        let mut entries = 0u64;
        for term in &terms {
            let term_id = txn.upsert_term(term)?;
            txn.record_occurrence(term_id, doc_id)?;
            entries += 1;
        }
        txn.finalize_index_pass(doc_id, entries)?;
        txn.commit();

        tracing::debug!(path = %path.display(), entries, "indexed");
        Ok(FileOutcome::Indexed { entries })
    }

    /// Clear documents under `root` whose files disappeared, and forget their
    /// modification time so a restored file is indexed again.
    fn prune_missing(&self, root: &Path, seen: &HashSet<PathBuf>) -> Result<usize> {
        let mut pruned = 0;
        for doc in self.store.documents() {
            if doc.entry_count == 0 || !doc.path.starts_with(root) || seen.contains(&doc.path) || doc.path.exists() {
                continue;
            }
            let Some(_claim) = self.store.claim_path(&doc.path) else { continue };
            let mut txn = self.store.transaction();
            txn.soft_delete_document(&doc.path)?;
            txn.mark_stale(&doc.path)?;
            txn.commit();
            tracing::info!(path = %doc.path.display(), "removed file pruned from index");
            pruned += 1;
        }
        Ok(pruned)
    }
}

/// Crawl `root` with the default extractor.
pub fn index_directory(store: &Store, root: &Path) -> Result<CrawlReport> {
    Crawler::new(store, &FileExtractor).index_directory(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn missing_root_is_an_input_error() {
        let store = Store::in_memory();
        let err = index_directory(&store, Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::RootNotFound(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn busy_path_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello").unwrap();
        let store = Store::in_memory();
        let _held = store.claim_path(&file).unwrap();

        let outcome = Crawler::new(&store, &FileExtractor).index_file(&file, SystemTime::now()).unwrap();
        assert_eq!(outcome, FileOutcome::Busy);
        assert!(store.lookup_document(&file).is_none());
    }

    #[test]
    fn staleness_uses_strictly_newer() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello world").unwrap();
        let store = Store::in_memory();
        let crawler = Crawler::new(&store, &FileExtractor);
        let t = UNIX_EPOCH + Duration::from_secs(1_000);

        assert_eq!(crawler.index_file(&file, t).unwrap(), FileOutcome::Indexed { entries: 2 });
        assert_eq!(crawler.index_file(&file, t).unwrap(), FileOutcome::Unchanged);
        assert_eq!(
            crawler.index_file(&file, t + Duration::from_secs(1)).unwrap(),
            FileOutcome::Indexed { entries: 2 }
        );
    }

    #[test]
    fn new_file_with_epoch_mtime_is_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "rust at the epoch").unwrap();
        let store = Store::in_memory();
        let crawler = Crawler::new(&store, &FileExtractor);

        assert_eq!(crawler.index_file(&file, UNIX_EPOCH).unwrap(), FileOutcome::Indexed { entries: 4 });
        assert_eq!(crawler.index_file(&file, UNIX_EPOCH).unwrap(), FileOutcome::Unchanged);
        assert_eq!(crate::search::search(&store, "rust", 1).unwrap().data.len(), 1);
    }

    #[test]
    fn stale_document_is_reindexed_regardless_of_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello world").unwrap();
        let store = Store::in_memory();
        let crawler = Crawler::new(&store, &FileExtractor);
        crawler.index_file(&file, UNIX_EPOCH).unwrap();

        let mut txn = store.transaction();
        txn.soft_delete_document(&file).unwrap();
        txn.mark_stale(&file).unwrap();
        txn.commit();
        assert_eq!(crawler.index_file(&file, UNIX_EPOCH).unwrap(), FileOutcome::Indexed { entries: 2 });
        assert_eq!(store.lookup_document(&file).unwrap().last_modified, Some(UNIX_EPOCH));
    }

    #[test]
    fn cancelled_crawl_stops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let store = Store::in_memory();
        let token = CancellationToken::new();
        token.cancel();
        let err = Crawler::new(&store, &FileExtractor)
            .with_cancellation(token)
            .index_directory(dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
