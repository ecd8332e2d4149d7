//! Local full-text search: a TF-IDF inverted index kept in step with a
//! directory tree.

pub mod crawl;
pub mod error;
pub mod extract;
pub mod persist;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use crawl::{index_directory, CrawlReport, Crawler, FileOutcome};
pub use error::{Error, Result};
pub use extract::{Extractor, FileExtractor, Format};
pub use search::{search, RankedRows, ScoredPath, SearchHit, SearchPage, Searcher, PAGE_SIZE};
pub use store::{DocId, Document, PathClaim, Posting, Store, StoreStats, Term, TermId, Transaction};
