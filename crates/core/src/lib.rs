pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod stores;
pub mod traits;

pub use chunking::{
    chunk_text, normalize_whitespace, ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use embeddings::{cosine_distance, Embedder, HashedTrigramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, StoreError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{
    digest_file, discover_pdf_files, ingest_file, ingest_folder, ingest_pdfs, IngestOutcome,
    IngestedPaper, IngestionReport, SkippedPdf, DEFAULT_PDF_PATTERN,
};
pub use memory::ResearchMemory;
pub use metadata::{extract_paper_metadata, first_match, Heuristic, MetadataField, HEURISTICS};
pub use models::{
    record_id, split_record_id, ChunkRecord, MemoryConfig, MemoryStats, MetadataUpdate,
    MetadataValue, PaperMetadata, SimilarPaper, StoredPaper, DEFAULT_COLLECTION,
    DEFAULT_STORE_DIR, UNKNOWN_AUTHORS, UNKNOWN_TITLE, UNKNOWN_YEAR,
};
pub use stores::{LocalCollection, QdrantCollection, DEFAULT_QDRANT_TIMEOUT};
pub use traits::{ChunkCollection, CollectionHit};
