use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use folio_core::{index_directory, Extractor, FileExtractor, Store};
use folio_server::crawl_task::{CrawlStatus, CrawlTask, StartError};
use folio_server::{build_app, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use tempfile::tempdir;
use tower::ServiceExt;

fn build_tiny_corpus(dir: &Path) {
    fs::write(dir.join("0.txt"), "Rust is great. rust systems programming.").unwrap();
    fs::write(dir.join("1.txt"), "Learning rust with a book about cooking.").unwrap();
    fs::write(dir.join("2.txt"), "Cooking pasta.").unwrap();
}

fn app_for(root: &Path, store: Arc<Store>) -> (Router, Arc<CrawlTask>) {
    let crawl = Arc::new(CrawlTask::new(store.clone(), Arc::new(FileExtractor)));
    let state = AppState { store, crawl: crawl.clone(), root: root.to_path_buf(), page_size: 10 };
    (build_app(state), crawl)
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    call(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_corpus(dir.path());
    let store = Arc::new(Store::in_memory());
    index_directory(&store, dir.path()).unwrap();
    let (app, _) = app_for(dir.path(), store);

    let (status, json) = get(app, "/search?query=rust&page=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pages"], 1);
    let arr = json["data"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert!(arr[0]["file_path"].as_str().unwrap().ends_with("0.txt"));
    assert!(arr[1]["file_path"].as_str().unwrap().ends_with("1.txt"));
    assert!(arr[0]["score"].as_f64().unwrap() > arr[1]["score"].as_f64().unwrap());
}

#[tokio::test]
async fn bad_page_numbers_fall_back_to_first_page() {
    let dir = tempdir().unwrap();
    build_tiny_corpus(dir.path());
    let store = Arc::new(Store::in_memory());
    index_directory(&store, dir.path()).unwrap();
    let (app, _) = app_for(dir.path(), store);

    for uri in ["/search?query=cooking", "/search?query=cooking&page=abc", "/search?query=cooking&page=-3"] {
        let (status, json) = get(app.clone(), uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(json["page"], 1);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
    }

    let (status, json) = get(app, "/search?query=cooking&page=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pages"], 1);
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_queries_are_rejected() {
    let dir = tempdir().unwrap();
    let (app, _) = app_for(dir.path(), Arc::new(Store::in_memory()));

    for uri in ["/search", "/search?query=", "/search?query=%20%20"] {
        let (status, json) = get(app.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json["error"].is_string());
    }
    // Non-ASCII only: not empty text, but no searchable terms.
    let (status, json) = get(app, "/search?query=%C3%A9").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "query yields no searchable terms");
}

#[tokio::test]
async fn index_endpoint_runs_background_crawl() {
    let dir = tempdir().unwrap();
    build_tiny_corpus(dir.path());
    let store = Arc::new(Store::in_memory());
    let (app, crawl) = app_for(dir.path(), store.clone());

    let req = Request::post("/index").body(Body::empty()).unwrap();
    let (status, json) = call(app.clone(), req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["crawl"]["state"], "running");

    crawl.wait().await;
    match crawl.status() {
        CrawlStatus::Completed { report, .. } => assert_eq!(report.indexed, 3),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(store.total_document_count(), 3);

    let (status, json) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["documents"], 3);
    assert_eq!(json["crawl"]["state"], "completed");

    let (_, json) = get(app, "/search?query=pasta").await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn index_endpoint_rejects_missing_directory() {
    let dir = tempdir().unwrap();
    let (app, _) = app_for(dir.path(), Arc::new(Store::in_memory()));

    let req = Request::post("/index")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"path": "/no/such/folder"}"#))
        .unwrap();
    let (status, json) = call(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("/no/such/folder"));
}

/// Extractor that blocks until the test opens the gate.
struct GatedExtractor {
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl Extractor for GatedExtractor {
    fn supports(&self, path: &Path) -> bool {
        FileExtractor.supports(path)
    }

    fn extract(&self, path: &Path) -> folio_core::Result<String> {
        let (open, cvar) = &*self.gate;
        let mut open = open.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
        FileExtractor.extract(path)
    }
}

#[tokio::test]
async fn second_crawl_conflicts_while_running() {
    let dir = tempdir().unwrap();
    build_tiny_corpus(dir.path());
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let crawl = CrawlTask::new(Arc::new(Store::in_memory()), Arc::new(GatedExtractor { gate: gate.clone() }));

    crawl.start(dir.path().to_path_buf()).unwrap();
    let second = crawl.start(dir.path().to_path_buf());
    assert!(matches!(second, Err(StartError::AlreadyRunning)));

    {
        let (open, cvar) = &*gate;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }
    crawl.wait().await;
    assert!(matches!(crawl.status(), CrawlStatus::Completed { .. }));
    assert!(crawl.start(dir.path().to_path_buf()).is_ok());
    crawl.wait().await;
}
