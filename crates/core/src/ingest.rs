use crate::{
    chunk_text, extract_paper_metadata, ChunkCollection, ChunkingConfig, Embedder, IngestError,
    PdfExtractor, ResearchMemory,
};
use chrono::{DateTime, Utc};
use globset::Glob;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_PDF_PATTERN: &str = "*.pdf";

/// Recursively lists files under `folder` whose file name matches `pattern`.
pub fn discover_pdf_files(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, IngestError> {
    let matcher = Glob::new(pattern)?.compile_matcher();
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if matcher.is_match(entry.file_name()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone)]
pub struct IngestedPaper {
    pub path: PathBuf,
    pub paper_id: String,
    pub title: String,
    pub authors: String,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Ingested(IngestedPaper),
    Failed(SkippedPdf),
}

impl IngestOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Ingested(paper) => &paper.path,
            Self::Failed(skipped) => &skipped.path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub started_at: DateTime<Utc>,
    pub folder: Option<PathBuf>,
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestionReport {
    pub fn ingested(&self) -> impl Iterator<Item = &IngestedPaper> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            IngestOutcome::Ingested(paper) => Some(paper),
            IngestOutcome::Failed(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedPdf> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            IngestOutcome::Failed(skipped) => Some(skipped),
            IngestOutcome::Ingested(_) => None,
        })
    }

    pub fn success_count(&self) -> usize {
        self.ingested().count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// Plain-text report suitable for writing next to the ingested folder.
    pub fn render(&self) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();
        let _ = writeln!(out, "PDF Ingestion Report");
        let _ = writeln!(out, "{rule}\n");
        let _ = writeln!(out, "Date: {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        if let Some(folder) = &self.folder {
            let _ = writeln!(out, "Folder: {}", folder.display());
        }
        let _ = writeln!(out, "Total files: {}", self.outcomes.len());
        let _ = writeln!(out, "Successful: {}", self.success_count());
        let _ = writeln!(out, "Failed: {}\n", self.failure_count());
        let _ = writeln!(out, "DETAILED RESULTS:");
        let _ = writeln!(out, "{}", "-".repeat(50));

        for outcome in &self.outcomes {
            match outcome {
                IngestOutcome::Ingested(paper) => {
                    let _ = writeln!(out, "SUCCESS: {}", paper.path.display());
                    let _ = writeln!(out, "     Paper ID: {}", paper.paper_id);
                    let _ = writeln!(out, "     Title: {}", paper.title);
                }
                IngestOutcome::Failed(skipped) => {
                    let _ = writeln!(out, "FAILED: {}", skipped.path.display());
                    let _ = writeln!(out, "     Error: {}", skipped.reason);
                }
            }
            out.push('\n');
        }

        out
    }
}

/// Extracts, annotates, chunks and stores a single paper.
pub async fn ingest_file<C, E, X>(
    memory: &ResearchMemory<C, E>,
    extractor: &X,
    path: &Path,
    chunking: &ChunkingConfig,
) -> Result<IngestedPaper, IngestError>
where
    C: ChunkCollection,
    E: Embedder + Sync,
    X: PdfExtractor + ?Sized,
{
    if !path.is_file() {
        return Err(IngestError::FileNotFound(path.display().to_string()));
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let text = extractor.extract_text(path)?;
    let file_size = fs::metadata(path)?.len();
    let checksum = digest_file(path)?;
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let mut metadata = extract_paper_metadata(&text);
    metadata.insert("file_name", file_name)?;
    metadata.insert("file_size", i64::try_from(file_size).unwrap_or(i64::MAX))?;
    metadata.insert("checksum", checksum)?;
    metadata.file_path = Some(absolute.to_string_lossy().to_string());
    metadata.ingested_at = Some(Utc::now());
    metadata.processed = false;

    let chunks = chunk_text(&text, chunking);
    let paper_id = memory.store(&text, &metadata, Some(chunks.as_slice())).await?;

    Ok(IngestedPaper {
        path: path.to_path_buf(),
        paper_id,
        title: metadata.title,
        authors: metadata.authors,
        chunks: chunks.len(),
    })
}

/// Ingests every path, recording failures instead of stopping at them.
pub async fn ingest_pdfs<C, E, X>(
    memory: &ResearchMemory<C, E>,
    extractor: &X,
    paths: &[PathBuf],
    chunking: &ChunkingConfig,
) -> IngestionReport
where
    C: ChunkCollection,
    E: Embedder + Sync,
    X: PdfExtractor + ?Sized,
{
    let started_at = Utc::now();
    let mut outcomes = Vec::with_capacity(paths.len());

    for path in paths {
        match ingest_file(memory, extractor, path, chunking).await {
            Ok(paper) => {
                tracing::info!(
                    path = %path.display(),
                    paper_id = %paper.paper_id,
                    chunks = paper.chunks,
                    "ingested paper"
                );
                outcomes.push(IngestOutcome::Ingested(paper));
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), reason = %error, "skipped pdf");
                outcomes.push(IngestOutcome::Failed(SkippedPdf {
                    path: path.clone(),
                    reason: error.to_string(),
                }));
            }
        }
    }

    IngestionReport {
        started_at,
        folder: None,
        outcomes,
    }
}

pub async fn ingest_folder<C, E, X>(
    memory: &ResearchMemory<C, E>,
    extractor: &X,
    folder: &Path,
    pattern: &str,
    chunking: &ChunkingConfig,
) -> Result<IngestionReport, IngestError>
where
    C: ChunkCollection,
    E: Embedder + Sync,
    X: PdfExtractor + ?Sized,
{
    let started_at = Utc::now();
    let files = discover_pdf_files(folder, pattern)?;

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no files matching {pattern} found in {}",
            folder.display()
        )));
    }

    tracing::info!(folder = %folder.display(), files = files.len(), "found papers to ingest");
    let mut report = ingest_pdfs(memory, extractor, &files, chunking).await;
    report.started_at = started_at;
    report.folder = Some(folder.to_path_buf());
    Ok(report)
}
