use anyhow::Result;
use clap::{Parser, Subcommand};
use folio_core::persist::{load_meta, IndexPaths};
use folio_core::{index_directory, Searcher, Store, PAGE_SIZE};
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "folio-indexer")]
#[command(about = "Build, query and check the folio index offline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a directory tree and bring the index up to date
    Index {
        /// Directory tree to index
        #[arg(long, default_value = "documents")]
        root: String,
        /// Index storage directory
        #[arg(long, default_value = "./storage")]
        storage: String,
    },
    /// Run a ranked query against the stored index
    Search {
        #[arg(long, default_value = "./storage")]
        storage: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,
        #[arg(long, default_value_t = PAGE_SIZE)]
        page_size: usize,
    },
    /// Check the counting invariants of the stored index
    Verify {
        #[arg(long, default_value = "./storage")]
        storage: String,
    },
    /// Print index statistics
    Stats {
        #[arg(long, default_value = "./storage")]
        storage: String,
    },
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Index { root, storage } => {
            let store = Store::open(&storage)?;
            let report = index_directory(&store, Path::new(&root))?;
            store.flush()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Search { storage, query, page, page_size } => {
            let store = Store::open(&storage)?;
            let results = Searcher::new(&store).with_page_size(page_size).search(&query, page)?;
            for hit in &results.data {
                tracing::info!(path = %hit.file_path, score = hit.score, "hit");
            }
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Verify { storage } => {
            let store = Store::open(&storage)?;
            store.verify()?;
            println!("index at {storage} is consistent");
        }
        Commands::Stats { storage } => {
            let store = Store::open(&storage)?;
            let mut stats = serde_json::to_value(store.stats())?;
            if let Ok(meta) = load_meta(&IndexPaths::new(&storage)) {
                stats["saved_at"] = serde_json::Value::String(meta.saved_at);
            }
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
