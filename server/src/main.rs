use anyhow::Result;
use axum::Router;
use clap::Parser;
use folio_core::{FileExtractor, Store, PAGE_SIZE};
use folio_server::crawl_task::{CrawlTask, StartError};
use folio_server::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "folio-server")]
#[command(about = "Serve ranked full-text search over a document folder", long_about = None)]
struct Args {
    /// Directory tree to index
    #[arg(long, env = "FOLIO_ROOT", default_value = "documents")]
    root: PathBuf,
    /// Directory holding the persisted index
    #[arg(long, env = "FOLIO_STORAGE", default_value = "./storage")]
    storage: PathBuf,
    /// Host to bind
    #[arg(long, env = "FOLIO_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, env = "FOLIO_PORT", default_value_t = 8080)]
    port: u16,
    /// Results per page
    #[arg(long, env = "FOLIO_PAGE_SIZE", default_value_t = PAGE_SIZE)]
    page_size: usize,
    /// Serve the stored index without crawling at startup
    #[arg(long, default_value_t = false)]
    no_crawl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let store = Arc::new(Store::open(&args.storage)?);
    let crawl = Arc::new(CrawlTask::new(store.clone(), Arc::new(FileExtractor)));
    if !args.no_crawl {
        match crawl.start(args.root.clone()) {
            Ok(_) => {}
            Err(StartError::RootNotFound(root)) => {
                tracing::warn!(root = %root.display(), "root directory not found, serving stored index only");
            }
            Err(StartError::AlreadyRunning) => {}
        }
    }

    let state = AppState { store: store.clone(), crawl: crawl.clone(), root: args.root.clone(), page_size: args.page_size };
    let app: Router = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    crawl.cancel();
    crawl.wait().await;
    store.flush()?;
    tracing::info!("index flushed, bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
