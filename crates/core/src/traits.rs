use crate::models::{ChunkRecord, PaperMetadata};
use crate::StoreError;
use async_trait::async_trait;

/// A record returned by a nearest-neighbour query with its raw distance.
#[derive(Debug, Clone)]
pub struct CollectionHit {
    pub record: ChunkRecord,
    pub distance: f64,
}

/// Persistent vector collection holding chunk records.
#[async_trait]
pub trait ChunkCollection: Send + Sync {
    async fn add(&self, records: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError>;

    /// Nearest records first. Ties are ordered however the backend orders them.
    async fn query(&self, query_vector: &[f32], limit: usize) -> Result<Vec<CollectionHit>, StoreError>;

    /// Every record whose metadata carries `paper_id`, in storage order.
    async fn get_by_paper(&self, paper_id: &str) -> Result<Vec<ChunkRecord>, StoreError>;

    async fn scan(&self) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Replaces the metadata of every record of `paper_id`; returns how many
    /// records were touched.
    async fn update_metadata(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
