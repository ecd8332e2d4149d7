use folio_core::{CrawlReport, Crawler, Error, Extractor, Store};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CrawlStatus {
    Idle,
    Running { root: String, started_at: String },
    Completed { root: String, finished_at: String, report: CrawlReport },
    Failed { root: String, error: String },
    Cancelled { root: String },
}

impl CrawlStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, CrawlStatus::Running { .. })
    }
}

#[derive(Debug)]
pub enum StartError {
    AlreadyRunning,
    RootNotFound(PathBuf),
}

/// Background crawl of the document tree, one run at a time.
pub struct CrawlTask {
    store: Arc<Store>,
    extractor: Arc<dyn Extractor>,
    status: Arc<RwLock<CrawlStatus>>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn now() -> String {
    time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

impl CrawlTask {
    pub fn new(store: Arc<Store>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            store,
            extractor,
            status: Arc::new(RwLock::new(CrawlStatus::Idle)),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn status(&self) -> CrawlStatus {
        self.status.read().clone()
    }

    /// Spawn a crawl of `root` on the blocking pool. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, root: PathBuf) -> Result<CrawlStatus, StartError> {
        if !root.is_dir() {
            return Err(StartError::RootNotFound(root));
        }
        let running = {
            let mut status = self.status.write();
            if status.is_running() {
                return Err(StartError::AlreadyRunning);
            }
            *status = CrawlStatus::Running { root: root.display().to_string(), started_at: now() };
            status.clone()
        };

        let store = self.store.clone();
        let extractor = self.extractor.clone();
        let status = self.status.clone();
        let token = self.shutdown.child_token();
        let handle = tokio::task::spawn_blocking(move || {
            let result = Crawler::new(&store, extractor.as_ref()).with_cancellation(token).index_directory(&root);
            if let Err(err) = store.flush() {
                tracing::error!(error = %err, "failed to flush index after crawl");
            }
            let label = root.display().to_string();
            *status.write() = match result {
                Ok(report) => CrawlStatus::Completed { root: label, finished_at: now(), report },
                Err(Error::Cancelled) => CrawlStatus::Cancelled { root: label },
                Err(err) => {
                    tracing::error!(error = %err, "crawl failed");
                    CrawlStatus::Failed { root: label, error: err.to_string() }
                }
            };
        });
        *self.handle.lock() = Some(handle);
        Ok(running)
    }

    /// Ask a running crawl to stop after its current file.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the most recently started crawl to finish.
    pub async fn wait(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "crawl task panicked");
            }
        }
    }
}
