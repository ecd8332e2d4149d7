//! TF-IDF ranking over the live postings of a [`Store`].
//!
//! A document's score is the sum over matching query terms of
//! `(frequency / entry_count) * ln(N / document_frequency)`, where `N` counts
//! every known document. Rows are ordered by score, highest first, with ties
//! broken by path so that pagination is stable.

use crate::error::{Error, Result};
use crate::store::{DocId, Store};
use crate::tokenizer::query_terms;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

pub const PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPath {
    pub path: PathBuf,
    pub score: f64,
}

/// One window of ranked rows plus the size of the full match set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedRows {
    pub matched: usize,
    pub rows: Vec<ScoredPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchPage {
    /// Total pages for the query; zero when nothing matched.
    pub pages: usize,
    /// Page actually served, after clamping.
    pub page: usize,
    pub data: Vec<SearchHit>,
}

impl SearchPage {
    pub fn paths(&self) -> Vec<&str> {
        self.data.iter().map(|h| h.file_path.as_str()).collect()
    }
}

impl Store {
    /// Score every document holding a live posting for one of `terms` and
    /// return rows `offset..offset + limit` of the ranking. Runs against a
    /// single read snapshot. Terms are visited in sorted order so equal
    /// inputs always sum their contributions the same way.
    pub fn ranked_search(&self, terms: &BTreeSet<String>, limit: usize, offset: usize) -> Result<RankedRows> {
        let tables = self.read();
        let n = tables.documents.len() as f64;
        if n == 0.0 {
            return Ok(RankedRows::default());
        }

        let mut scores: HashMap<DocId, f64> = HashMap::new();
        for text in terms {
            let Some(term_id) = tables.term_id(text) else { continue };
            let Some(by_doc) = tables.postings.get(&term_id) else { continue };
            let term = tables.term(term_id)?;
            for (&doc_id, &frequency) in by_doc.iter().filter(|(_, f)| **f > 0) {
                let doc = tables.document(doc_id)?;
                if doc.entry_count == 0 {
                    return Err(Error::invariant(format!(
                        "live posting for {:?} in cleared document {}",
                        term.text,
                        doc.path.display()
                    )));
                }
                if term.document_frequency == 0 {
                    return Err(Error::invariant(format!(
                        "live posting in {} for dormant term {:?}",
                        doc.path.display(),
                        term.text
                    )));
                }
                let tf = f64::from(frequency) / doc.entry_count as f64;
                let idf = (n / f64::from(term.document_frequency)).ln();
                *scores.entry(doc_id).or_insert(0.0) += tf * idf;
            }
        }

        let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
        let documents = &tables.documents;
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| documents[a.0 as usize].path.cmp(&documents[b.0 as usize].path))
        });

        let matched = ranked.len();
        let rows = ranked
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(doc_id, score)| ScoredPath { path: documents[doc_id as usize].path.clone(), score })
            .collect();
        Ok(RankedRows { matched, rows })
    }
}

/// Paginated query front-end over a store.
pub struct Searcher<'a> {
    store: &'a Store,
    page_size: usize,
}

impl<'a> Searcher<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store, page_size: PAGE_SIZE }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Rank `query` and serve page `page` (1-based). Pages below 1 are
    /// clamped to 1; pages past the end come back empty.
    pub fn search(&self, query: &str, page: i64) -> Result<SearchPage> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let page = usize::try_from(page.max(1)).unwrap_or(usize::MAX);
        let offset = (page - 1).saturating_mul(self.page_size);

        let ranked = self.store.ranked_search(&terms, self.page_size, offset)?;
        let pages = ranked.matched.div_ceil(self.page_size);
        tracing::debug!(query, page, pages, matched = ranked.matched, "ranked query");

        let data = ranked
            .rows
            .into_iter()
            .map(|row| SearchHit { file_path: row.path.to_string_lossy().into_owned(), score: row.score })
            .collect();
        Ok(SearchPage { pages, page, data })
    }
}

/// Rank `query` with the default page size.
pub fn search(store: &Store, query: &str, page: i64) -> Result<SearchPage> {
    Searcher::new(store).search(query, page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::UNIX_EPOCH;

    fn index(store: &Store, path: &str, text: &str) {
        let terms = crate::tokenizer::tokenize(text);
        let mut txn = store.transaction();
        txn.soft_delete_document(Path::new(path)).unwrap();
        let doc = txn.upsert_document(Path::new(path), UNIX_EPOCH).unwrap();
        for t in &terms {
            let id = txn.upsert_term(t).unwrap();
            txn.record_occurrence(id, doc).unwrap();
        }
        txn.finalize_index_pass(doc, terms.len() as u64).unwrap();
        txn.commit();
    }

    #[test]
    fn scores_follow_tf_idf() {
        let store = Store::in_memory();
        index(&store, "a.txt", "rust rust go");
        index(&store, "b.txt", "go python");
        index(&store, "c.txt", "python");

        let page = search(&store, "rust", 1).unwrap();
        assert_eq!(page.pages, 1);
        assert_eq!(page.paths(), vec!["a.txt"]);
        let expected = (2.0 / 3.0) * (3.0f64).ln();
        assert!((page.data[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn sums_contributions_across_terms() {
        let store = Store::in_memory();
        index(&store, "a.txt", "rust go");
        index(&store, "b.txt", "rust");
        index(&store, "c.txt", "java");

        let page = search(&store, "rust go", 1).unwrap();
        assert_eq!(page.paths(), vec!["a.txt", "b.txt"]);
        let n = 3.0f64;
        let a = 0.5 * (n / 2.0).ln() + 0.5 * (n / 1.0).ln();
        assert!((page.data[0].score - a).abs() < 1e-12);
    }

    #[test]
    fn ties_break_on_path() {
        let store = Store::in_memory();
        for name in ["c.txt", "a.txt", "b.txt"] {
            index(&store, name, "same words here");
        }
        index(&store, "z.txt", "other");
        let page = search(&store, "words", 1).unwrap();
        assert_eq!(page.paths(), vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn empty_query_is_an_input_error() {
        let store = Store::in_memory();
        index(&store, "a.txt", "rust");
        let err = search(&store, "", 1).unwrap_err();
        assert!(matches!(err, Error::EmptyQuery));
        assert!(err.is_input_error());
        assert!(matches!(search(&store, " \t\u{e9}", 1), Err(Error::EmptyQuery)));
    }

    #[test]
    fn empty_corpus_has_no_pages() {
        let store = Store::in_memory();
        let page = search(&store, "rust", 1).unwrap();
        assert_eq!(page.pages, 0);
        assert!(page.data.is_empty());
    }

    #[test]
    fn page_numbers_are_clamped() {
        let store = Store::in_memory();
        index(&store, "a.txt", "rust");
        index(&store, "b.txt", "go");
        assert_eq!(search(&store, "rust", 0).unwrap().page, 1);
        assert_eq!(search(&store, "rust", -4).unwrap().paths(), vec!["a.txt"]);
        let past = search(&store, "rust", 9).unwrap();
        assert_eq!(past.pages, 1);
        assert!(past.data.is_empty());
    }

    #[test]
    fn detects_live_posting_on_cleared_document() {
        let store = Store::in_memory();
        index(&store, "a.txt", "rust");
        index(&store, "b.txt", "go");
        {
            let mut tables = store.tables_for_test();
            tables.documents[0].entry_count = 0;
        }
        assert!(matches!(search(&store, "rust", 1), Err(Error::Invariant(_))));
    }

    #[test]
    fn detects_live_posting_on_dormant_term() {
        let store = Store::in_memory();
        index(&store, "a.txt", "rust");
        index(&store, "b.txt", "go");
        {
            let mut tables = store.tables_for_test();
            let rust = tables.term_id("rust").unwrap() as usize;
            tables.terms[rust].document_frequency = 0;
        }
        assert!(matches!(search(&store, "rust", 1), Err(Error::Invariant(_))));
        assert_eq!(search(&store, "go", 1).unwrap().paths(), vec!["b.txt"]);
    }

    #[test]
    fn equal_queries_score_identically() {
        let store = Store::in_memory();
        index(&store, "a.txt", "alpha beta gamma delta");
        index(&store, "b.txt", "delta gamma beta alpha epsilon");
        index(&store, "c.txt", "zeta");
        let first = search(&store, "gamma alpha delta beta", 1).unwrap();
        for query in ["alpha beta gamma delta", "delta beta alpha gamma"] {
            assert_eq!(search(&store, query, 1).unwrap(), first, "{query}");
        }
    }
}
