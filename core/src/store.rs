//! Inverted-index storage: documents, terms and the postings between them.
//!
//! All mutation goes through a [`Transaction`], which holds the write lock for
//! the duration of one re-index cycle. Readers never observe a half-applied
//! cycle: either the whole transaction is committed, or it is rolled back
//! from its undo journal when dropped.

use crate::error::{Error, Result};
use crate::persist::{self, IndexPaths, MetaFile};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub type TermId = u32;
pub type DocId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub path: PathBuf,
    /// Term occurrences currently indexed. Zero while the document is cleared.
    pub entry_count: u64,
    /// Modification time of the file as last indexed. `None` marks a
    /// document that must be re-indexed whatever the file's time says.
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub text: String,
    /// Number of documents with a live posting for this term.
    pub document_frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Posting {
    pub term_id: TermId,
    pub doc_id: DocId,
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub live_documents: usize,
    pub terms: usize,
    pub live_terms: usize,
    pub postings: usize,
    pub live_postings: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub(crate) documents: Vec<Document>,
    pub(crate) terms: Vec<Term>,
    doc_by_path: HashMap<PathBuf, DocId>,
    term_by_text: HashMap<String, TermId>,
    /// term -> document -> frequency
    pub(crate) postings: HashMap<TermId, BTreeMap<DocId, u32>>,
    /// document -> terms it holds postings for
    doc_terms: HashMap<DocId, BTreeSet<TermId>>,
}

/// Inverse of one mutation, replayed newest-first on rollback.
#[derive(Debug)]
enum Undo {
    InsertDocument,
    DocumentState {
        id: DocId,
        entry_count: u64,
        last_modified: Option<SystemTime>,
    },
    InsertTerm,
    DocumentFrequency {
        id: TermId,
        previous: u32,
    },
    Posting {
        term_id: TermId,
        doc_id: DocId,
        previous: Option<u32>,
    },
}

impl Tables {
    pub(crate) fn document_id(&self, path: &Path) -> Option<DocId> {
        self.doc_by_path.get(path).copied()
    }

    pub(crate) fn term_id(&self, text: &str) -> Option<TermId> {
        self.term_by_text.get(text).copied()
    }

    pub(crate) fn document(&self, id: DocId) -> Result<&Document> {
        self.documents
            .get(id as usize)
            .ok_or_else(|| Error::invariant(format!("unknown document id {id}")))
    }

    pub(crate) fn term(&self, id: TermId) -> Result<&Term> {
        self.terms
            .get(id as usize)
            .ok_or_else(|| Error::invariant(format!("unknown term id {id}")))
    }

    fn document_mut(&mut self, id: DocId) -> Result<&mut Document> {
        self.documents
            .get_mut(id as usize)
            .ok_or_else(|| Error::invariant(format!("unknown document id {id}")))
    }

    fn term_mut(&mut self, id: TermId) -> Result<&mut Term> {
        self.terms
            .get_mut(id as usize)
            .ok_or_else(|| Error::invariant(format!("unknown term id {id}")))
    }

    fn frequency(&self, term_id: TermId, doc_id: DocId) -> Option<u32> {
        self.postings.get(&term_id)?.get(&doc_id).copied()
    }

    fn set_frequency(&mut self, term_id: TermId, doc_id: DocId, frequency: Option<u32>) {
        match frequency {
            Some(f) => {
                self.postings.entry(term_id).or_default().insert(doc_id, f);
                self.doc_terms.entry(doc_id).or_default().insert(term_id);
            }
            None => {
                if let Some(by_doc) = self.postings.get_mut(&term_id) {
                    by_doc.remove(&doc_id);
                    if by_doc.is_empty() {
                        self.postings.remove(&term_id);
                    }
                }
                if let Some(terms) = self.doc_terms.get_mut(&doc_id) {
                    terms.remove(&term_id);
                    if terms.is_empty() {
                        self.doc_terms.remove(&doc_id);
                    }
                }
            }
        }
    }

    /// Postings of a document, live or not, ordered by term id.
    fn postings_of(&self, doc_id: DocId) -> Vec<Posting> {
        let Some(terms) = self.doc_terms.get(&doc_id) else {
            return Vec::new();
        };
        terms
            .iter()
            .filter_map(|&term_id| {
                self.frequency(term_id, doc_id).map(|frequency| Posting { term_id, doc_id, frequency })
            })
            .collect()
    }

    fn undo(&mut self, op: Undo) {
        match op {
            Undo::InsertDocument => {
                if let Some(doc) = self.documents.pop() {
                    self.doc_by_path.remove(&doc.path);
                }
            }
            Undo::DocumentState { id, entry_count, last_modified } => {
                if let Some(doc) = self.documents.get_mut(id as usize) {
                    doc.entry_count = entry_count;
                    doc.last_modified = last_modified;
                }
            }
            Undo::InsertTerm => {
                if let Some(term) = self.terms.pop() {
                    self.term_by_text.remove(&term.text);
                }
            }
            Undo::DocumentFrequency { id, previous } => {
                if let Some(term) = self.terms.get_mut(id as usize) {
                    term.document_frequency = previous;
                }
            }
            Undo::Posting { term_id, doc_id, previous } => self.set_frequency(term_id, doc_id, previous),
        }
    }

    fn verify(&self) -> Result<()> {
        if self.doc_by_path.len() != self.documents.len() {
            return Err(Error::invariant("document path index out of sync"));
        }
        if self.term_by_text.len() != self.terms.len() {
            return Err(Error::invariant("term text index out of sync"));
        }
        for term in &self.terms {
            let live = self
                .postings
                .get(&term.id)
                .map_or(0, |by_doc| by_doc.values().filter(|&&f| f > 0).count());
            if live != term.document_frequency as usize {
                return Err(Error::invariant(format!(
                    "term {:?} has document frequency {} but {} live postings",
                    term.text, term.document_frequency, live
                )));
            }
        }
        for doc in &self.documents {
            let total: u64 = self.postings_of(doc.id).iter().map(|p| u64::from(p.frequency)).sum();
            if total != doc.entry_count {
                return Err(Error::invariant(format!(
                    "document {} has entry count {} but {} indexed occurrences",
                    doc.path.display(),
                    doc.entry_count,
                    total
                )));
            }
        }
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            documents: self.documents.len(),
            live_documents: self.documents.iter().filter(|d| d.entry_count > 0).count(),
            terms: self.terms.len(),
            live_terms: self.terms.iter().filter(|t| t.document_frequency > 0).count(),
            ..StoreStats::default()
        };
        for by_doc in self.postings.values() {
            stats.postings += by_doc.len();
            stats.live_postings += by_doc.values().filter(|&&f| f > 0).count();
        }
        stats
    }
}

/// Shared handle to the index. Cheap to share behind an `Arc`.
pub struct Store {
    tables: RwLock<Tables>,
    claims: Mutex<HashSet<PathBuf>>,
    paths: Option<IndexPaths>,
}

impl Store {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self { tables: RwLock::new(Tables::default()), claims: Mutex::new(HashSet::new()), paths: None }
    }

    /// Open the store persisted under `dir`, starting empty if nothing was saved yet.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let paths = IndexPaths::new(dir);
        let tables = persist::load_snapshot(&paths)?.unwrap_or_default();
        tracing::info!(
            root = %paths.root.display(),
            documents = tables.documents.len(),
            terms = tables.terms.len(),
            "opened index"
        );
        Ok(Self { tables: RwLock::new(tables), claims: Mutex::new(HashSet::new()), paths: Some(paths) })
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.paths.as_ref().map(|p| p.root.as_path())
    }

    /// Write the current state to disk. No-op for in-memory stores.
    pub fn flush(&self) -> Result<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let tables = self.tables.read();
        persist::save_snapshot(paths, &tables)?;
        persist::save_meta(paths, &MetaFile::describe(tables.documents.len(), tables.terms.len()))?;
        tracing::debug!(root = %paths.root.display(), "flushed index");
        Ok(())
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read()
    }

    #[cfg(test)]
    pub(crate) fn tables_for_test(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write()
    }

    /// Begin an atomic unit of work. Blocks until other writers finish.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction { tables: self.tables.write(), journal: Vec::new(), committed: false }
    }

    /// Reserve `path` for a re-index cycle. `None` if another cycle holds it.
    pub fn claim_path(&self, path: &Path) -> Option<PathClaim<'_>> {
        let mut claims = self.claims.lock();
        if !claims.insert(path.to_path_buf()) {
            return None;
        }
        Some(PathClaim { claims: &self.claims, path: path.to_path_buf() })
    }

    pub fn lookup_document(&self, path: &Path) -> Option<Document> {
        let tables = self.tables.read();
        let id = tables.document_id(path)?;
        tables.documents.get(id as usize).cloned()
    }

    pub fn lookup_term(&self, text: &str) -> Option<Term> {
        let tables = self.tables.read();
        let id = tables.term_id(text)?;
        tables.terms.get(id as usize).cloned()
    }

    /// Corpus size for IDF, cleared documents included.
    pub fn total_document_count(&self) -> u64 {
        self.tables.read().documents.len() as u64
    }

    /// Clear a document in its own transaction.
    pub fn soft_delete_document(&self, path: &Path) -> Result<bool> {
        let mut txn = self.transaction();
        let found = txn.soft_delete_document(path)?;
        txn.commit();
        Ok(found)
    }

    pub fn documents(&self) -> Vec<Document> {
        self.tables.read().documents.clone()
    }

    /// Every posting of the document at `path`, including cleared ones.
    pub fn postings_for(&self, path: &Path) -> Vec<Posting> {
        let tables = self.tables.read();
        tables.document_id(path).map(|id| tables.postings_of(id)).unwrap_or_default()
    }

    pub fn stats(&self) -> StoreStats {
        self.tables.read().stats()
    }

    /// Check the counting invariants across the whole index.
    pub fn verify(&self) -> Result<()> {
        self.tables.read().verify()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Exclusive right to re-index one path; released on drop.
pub struct PathClaim<'a> {
    claims: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for PathClaim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.path);
    }
}

/// Write access to the index. Changes become visible together on
/// [`commit`](Transaction::commit) and are undone if the transaction is dropped.
pub struct Transaction<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
    journal: Vec<Undo>,
    committed: bool,
}

impl Transaction<'_> {
    /// Id of the document at `path`, created cleared if new. An existing
    /// document gets `last_modified` refreshed.
    pub fn upsert_document(&mut self, path: &Path, last_modified: SystemTime) -> Result<DocId> {
        if let Some(id) = self.tables.document_id(path) {
            let doc = self.tables.document_mut(id)?;
            let undo = Undo::DocumentState { id, entry_count: doc.entry_count, last_modified: doc.last_modified };
            doc.last_modified = Some(last_modified);
            self.journal.push(undo);
            return Ok(id);
        }
        let id = DocId::try_from(self.tables.documents.len())
            .map_err(|_| Error::invariant("document id space exhausted"))?;
        self.tables.documents.push(Document {
            id,
            path: path.to_path_buf(),
            entry_count: 0,
            last_modified: Some(last_modified),
        });
        self.tables.doc_by_path.insert(path.to_path_buf(), id);
        self.journal.push(Undo::InsertDocument);
        Ok(id)
    }

    /// Id of `text`, created dormant if new.
    pub fn upsert_term(&mut self, text: &str) -> Result<TermId> {
        if let Some(id) = self.tables.term_id(text) {
            return Ok(id);
        }
        let id = TermId::try_from(self.tables.terms.len()).map_err(|_| Error::invariant("term id space exhausted"))?;
        self.tables.terms.push(Term { id, text: text.to_string(), document_frequency: 0 });
        self.tables.term_by_text.insert(text.to_string(), id);
        self.journal.push(Undo::InsertTerm);
        Ok(id)
    }

    /// Count one occurrence of a term in a document.
    pub fn record_occurrence(&mut self, term_id: TermId, doc_id: DocId) -> Result<()> {
        self.tables.term(term_id)?;
        self.tables.document(doc_id)?;
        let previous = self.tables.frequency(term_id, doc_id);
        let next = previous
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| Error::invariant("posting frequency overflow"))?;
        self.tables.set_frequency(term_id, doc_id, Some(next));
        self.journal.push(Undo::Posting { term_id, doc_id, previous });
        Ok(())
    }

    /// Withdraw a document's contribution: every live posting loses its term
    /// credit and drops to zero, and the document is left with no entries.
    /// Returns `false` when no document exists at `path`.
    pub fn soft_delete_document(&mut self, path: &Path) -> Result<bool> {
        let Some(doc_id) = self.tables.document_id(path) else {
            return Ok(false);
        };
        for posting in self.tables.postings_of(doc_id) {
            if posting.frequency == 0 {
                continue;
            }
            let term = self.tables.term_mut(posting.term_id)?;
            let previous = term.document_frequency;
            term.document_frequency = previous.saturating_sub(1);
            self.journal.push(Undo::DocumentFrequency { id: posting.term_id, previous });

            self.tables.set_frequency(posting.term_id, doc_id, Some(0));
            self.journal.push(Undo::Posting { term_id: posting.term_id, doc_id, previous: Some(posting.frequency) });
        }
        let doc = self.tables.document_mut(doc_id)?;
        let undo = Undo::DocumentState { id: doc_id, entry_count: doc.entry_count, last_modified: doc.last_modified };
        doc.entry_count = 0;
        self.journal.push(undo);
        Ok(true)
    }

    /// Forget the recorded modification time of the document at `path`, so
    /// the next crawl re-indexes it. Returns `false` when no document exists.
    pub fn mark_stale(&mut self, path: &Path) -> Result<bool> {
        let Some(doc_id) = self.tables.document_id(path) else {
            return Ok(false);
        };
        let doc = self.tables.document_mut(doc_id)?;
        let undo = Undo::DocumentState { id: doc_id, entry_count: doc.entry_count, last_modified: doc.last_modified };
        doc.last_modified = None;
        self.journal.push(undo);
        Ok(true)
    }

    /// Close an index pass: store the occurrence count and credit each term
    /// with a live posting in this document.
    pub fn finalize_index_pass(&mut self, doc_id: DocId, entries: u64) -> Result<()> {
        let doc = self.tables.document(doc_id)?;
        if doc.entry_count != 0 {
            return Err(Error::invariant(format!(
                "document {} finalized twice without being cleared",
                doc.path.display()
            )));
        }
        let live: Vec<Posting> = self.tables.postings_of(doc_id).into_iter().filter(|p| p.frequency > 0).collect();
        let counted: u64 = live.iter().map(|p| u64::from(p.frequency)).sum();
        if counted != entries {
            return Err(Error::invariant(format!(
                "document {} finalized with {entries} entries but {counted} were recorded",
                doc.path.display()
            )));
        }

        let doc = self.tables.document_mut(doc_id)?;
        let undo = Undo::DocumentState { id: doc_id, entry_count: doc.entry_count, last_modified: doc.last_modified };
        doc.entry_count = entries;
        self.journal.push(undo);

        for posting in live {
            let term = self.tables.term_mut(posting.term_id)?;
            let previous = term.document_frequency;
            term.document_frequency = previous + 1;
            self.journal.push(Undo::DocumentFrequency { id: posting.term_id, previous });
        }
        Ok(())
    }

    /// Publish every change made through this transaction.
    pub fn commit(mut self) {
        self.committed = true;
        self.journal.clear();
    }

    /// Undo every change made through this transaction.
    pub fn rollback(self) {}
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(op) = self.journal.pop() {
            self.tables.undo(op);
        }
    }
}
