use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use paper_memory_core::{
    ingest_folder, ChunkCollection, ChunkingConfig, Embedder, HashedTrigramEmbedder,
    LocalCollection, LopdfExtractor, MemoryConfig, QdrantCollection, ResearchMemory, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_COLLECTION, DEFAULT_PDF_PATTERN, DEFAULT_STORE_DIR,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "paper-memory", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Collection backend.
    #[arg(long, value_enum, env = "PAPER_MEMORY_BACKEND", default_value = "local")]
    backend: Backend,

    /// Directory holding the local collection.
    #[arg(long, env = "PAPER_MEMORY_DIR", default_value = DEFAULT_STORE_DIR)]
    store_dir: PathBuf,

    /// Collection name.
    #[arg(long, env = "PAPER_MEMORY_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant request timeout in seconds
    #[arg(long, default_value = "30")]
    qdrant_timeout_secs: u64,

    /// Words per chunk.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Words shared by consecutive chunks.
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Local,
    Qdrant,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every matching PDF under a folder.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long, short, default_value = ".")]
        folder: PathBuf,
        /// File name pattern.
        #[arg(long, short, default_value = DEFAULT_PDF_PATTERN)]
        pattern: String,
        /// Write a plain-text ingestion report to this file.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Find the chunks closest to a query.
    Search {
        #[arg(long)]
        query: String,
        /// Number of chunks to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// List one metadata record per stored paper.
    List,
    /// Print a stored paper.
    Show {
        #[arg(long)]
        paper_id: String,
        /// Truncate the printed content to this many characters.
        #[arg(long)]
        max_chars: Option<usize>,
    },
    /// Flag a paper section as processed.
    MarkProcessed {
        #[arg(long)]
        paper_id: String,
        #[arg(long, default_value = "summary")]
        section: String,
    },
    /// Count stored papers and chunks.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = MemoryConfig {
        store_dir: cli.store_dir,
        collection: cli.collection,
        chunking: ChunkingConfig::new(cli.chunk_size, cli.chunk_overlap)?,
    };
    let embedder = HashedTrigramEmbedder::default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?cli.backend,
        started_at = %Utc::now().to_rfc3339(),
        "paper-memory boot"
    );

    match cli.backend {
        Backend::Local => {
            let collection = LocalCollection::open(&config.store_dir, &config.collection)
                .await
                .with_context(|| format!("opening store at {}", config.store_dir.display()))?;
            run(ResearchMemory::new(collection, embedder), cli.command, &config.chunking).await
        }
        Backend::Qdrant => {
            let collection = QdrantCollection::new(
                &cli.qdrant_url,
                &config.collection,
                embedder.dimensions(),
                Duration::from_secs(cli.qdrant_timeout_secs),
            )?;
            collection
                .ensure_collection()
                .await
                .with_context(|| format!("preparing qdrant collection {}", config.collection))?;
            run(ResearchMemory::new(collection, embedder), cli.command, &config.chunking).await
        }
    }
}

async fn run<C: ChunkCollection>(
    memory: ResearchMemory<C, HashedTrigramEmbedder>,
    command: Command,
    chunking: &ChunkingConfig,
) -> anyhow::Result<()> {
    match command {
        Command::Ingest {
            folder,
            pattern,
            output,
        } => {
            let report = ingest_folder(&memory, &LopdfExtractor, &folder, &pattern, chunking).await?;

            for skipped in report.skipped() {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }

            println!(
                "ingested {}/{} papers ({} failed)",
                report.success_count(),
                report.outcomes.len(),
                report.failure_count()
            );
            for paper in report.ingested() {
                println!("  {} ({}) chunks={}", paper.title, paper.paper_id, paper.chunks);
            }

            if let Some(output) = output {
                tokio::fs::write(&output, report.render())
                    .await
                    .with_context(|| format!("writing report to {}", output.display()))?;
                println!("report saved to {}", output.display());
            }
        }
        Command::Search { query, top_k } => {
            let matches = memory.search_similar(&query, top_k).await?;
            println!("query: {query}");
            for hit in matches {
                println!(
                    "[{:.4}] paper={} record={} title={}",
                    hit.similarity, hit.paper_id, hit.record_id, hit.metadata.title
                );
                println!("  {}", preview(&hit.content, 240));
            }
        }
        Command::List => {
            let papers = memory.list_all_metadata().await?;
            println!("{} papers", papers.len());
            for metadata in papers {
                let marker = if metadata.processed { "done" } else { "new " };
                println!("[{marker}] {}", metadata.title);
                println!("  id: {}", metadata.paper_id.unwrap_or_default());
                println!("  authors: {} year: {}", metadata.authors, metadata.year);
                if let Some(path) = metadata.file_path {
                    println!("  file: {path}");
                }
            }
        }
        Command::Show {
            paper_id,
            max_chars,
        } => match memory.get_by_id(&paper_id).await? {
            Some(paper) => {
                let metadata = &paper.metadata;
                println!("title: {}", metadata.title);
                println!("authors: {}", metadata.authors);
                println!("year: {}", metadata.year);
                println!("processed: {}", metadata.processed);
                for (key, value) in &metadata.extra {
                    println!("{key}: {value:?}");
                }
                println!("chunks: {}", paper.chunk_count);
                match max_chars {
                    Some(limit) => println!("{}", preview(&paper.content, limit)),
                    None => println!("{}", paper.content),
                }
            }
            None => anyhow::bail!("paper {paper_id} not found"),
        },
        Command::MarkProcessed { paper_id, section } => {
            match memory.mark_processed(&paper_id, &section).await? {
                Some(metadata) => println!("marked {section} processed for {}", metadata.title),
                None => anyhow::bail!("paper {paper_id} not found"),
            }
        }
        Command::Stats => {
            let stats = memory.stats().await?;
            println!("papers: {}", stats.papers);
            println!("chunks: {}", stats.chunks);
        }
    }

    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
