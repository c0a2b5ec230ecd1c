//! Paper-level view over a chunk collection.
//!
//! A paper is stored as one record per chunk, each carrying a full copy of the
//! paper metadata stamped with the generated paper id. Paper-level reads regroup
//! those records; metadata updates are written to every record of the paper so
//! that all readers see the same copy.

use crate::embeddings::Embedder;
use crate::models::{
    record_id, ChunkRecord, MemoryStats, MetadataUpdate, MetadataValue, PaperMetadata,
    SimilarPaper, StoredPaper,
};
use crate::traits::ChunkCollection;
use crate::StoreError;
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

pub struct ResearchMemory<C, E>
where
    C: ChunkCollection,
    E: Embedder,
{
    collection: C,
    embedder: E,
}

impl<C, E> ResearchMemory<C, E>
where
    C: ChunkCollection,
    E: Embedder + Sync,
{
    pub fn new(collection: C, embedder: E) -> Self {
        Self {
            collection,
            embedder,
        }
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Stores a paper and returns its freshly generated id.
    ///
    /// With no chunks (or an empty list) the full content becomes the single
    /// record. Storing identical input twice yields two independent papers.
    pub async fn store(
        &self,
        content: &str,
        metadata: &PaperMetadata,
        chunks: Option<&[String]>,
    ) -> Result<String, StoreError> {
        let paper_id = Uuid::new_v4().to_string();

        let mut paper_metadata = metadata.clone();
        paper_metadata.paper_id = Some(paper_id.clone());

        let documents: Vec<&str> = match chunks {
            Some(chunks) if !chunks.is_empty() => chunks.iter().map(String::as_str).collect(),
            _ => vec![content],
        };

        let records = documents
            .iter()
            .enumerate()
            .map(|(index, document)| ChunkRecord {
                id: record_id(&paper_id, index),
                document: (*document).to_string(),
                metadata: paper_metadata.clone(),
            })
            .collect::<Vec<_>>();
        let embeddings = documents
            .iter()
            .map(|document| self.embedder.embed(document))
            .collect::<Vec<_>>();

        self.collection.add(&records, &embeddings).await?;
        tracing::debug!(paper_id = %paper_id, records = records.len(), "stored paper");

        Ok(paper_id)
    }

    /// Nearest chunks to `query`, most similar first.
    pub async fn search_similar(
        &self,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<SimilarPaper>, StoreError> {
        let query_vector = self.embedder.embed(query);
        let hits = self.collection.query(&query_vector, n_results).await?;

        let matches = hits
            .into_iter()
            .map(|hit| {
                let similarity = 1.0 - hit.distance;
                if !(0.0..=1.0).contains(&similarity) {
                    tracing::warn!(
                        record_id = %hit.record.id,
                        distance = hit.distance,
                        "distance outside [0, 1]; collection metric may have changed"
                    );
                }
                SimilarPaper {
                    paper_id: hit.record.paper_id().to_string(),
                    record_id: hit.record.id,
                    content: hit.record.document,
                    metadata: hit.record.metadata,
                    similarity,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(query = %query, hits = matches.len(), "similarity search");
        Ok(matches)
    }

    /// Rebuilds a paper from its chunk records, or `None` if it was never stored.
    pub async fn get_by_id(&self, paper_id: &str) -> Result<Option<StoredPaper>, StoreError> {
        let mut records = self.collection.get_by_paper(paper_id).await?;
        if records.is_empty() {
            return Ok(None);
        }

        // Stable, so records without a sequence suffix keep storage order.
        records.sort_by_key(|record| record.sequence().unwrap_or(usize::MAX));

        let content = records
            .iter()
            .map(|record| record.document.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let chunk_count = records.len();
        let metadata = records.swap_remove(0).metadata;

        Ok(Some(StoredPaper {
            paper_id: paper_id.to_string(),
            content,
            metadata,
            chunk_count,
        }))
    }

    /// One metadata record per distinct paper, first-seen record wins.
    pub async fn list_all_metadata(&self) -> Result<Vec<PaperMetadata>, StoreError> {
        let records = self.collection.scan().await?;
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for record in records {
            let paper_id = record
                .metadata
                .paper_id
                .clone()
                .unwrap_or_else(|| record.paper_id().to_string());
            if seen.insert(paper_id) {
                result.push(record.metadata);
            }
        }

        Ok(result)
    }

    /// Applies `update` to every record of the paper and returns the merged
    /// metadata, or `None` when the paper does not exist.
    pub async fn update_metadata(
        &self,
        paper_id: &str,
        update: &MetadataUpdate,
    ) -> Result<Option<PaperMetadata>, StoreError> {
        let records = self.collection.get_by_paper(paper_id).await?;
        let Some(first) = records.into_iter().next() else {
            return Ok(None);
        };

        let mut metadata = first.metadata;
        if update.is_empty() {
            return Ok(Some(metadata));
        }
        metadata.apply(update)?;
        metadata.paper_id = Some(paper_id.to_string());

        let touched = self.collection.update_metadata(paper_id, &metadata).await?;
        tracing::debug!(paper_id = %paper_id, records = touched, "updated paper metadata");

        Ok(Some(metadata))
    }

    /// Flags a paper, and the named section of it, as processed.
    pub async fn mark_processed(
        &self,
        paper_id: &str,
        section: &str,
    ) -> Result<Option<PaperMetadata>, StoreError> {
        let mut update = MetadataUpdate {
            processed: Some(true),
            ..MetadataUpdate::default()
        };
        update.extra.insert(
            format!("processed_{}", section_key(section)),
            MetadataValue::Flag(true),
        );
        update
            .extra
            .insert("processed_at".to_string(), MetadataValue::from(Utc::now()));

        self.update_metadata(paper_id, &update).await
    }

    pub async fn stats(&self) -> Result<MemoryStats, StoreError> {
        let records = self.collection.scan().await?;
        let papers = records
            .iter()
            .map(|record| record.paper_id())
            .collect::<HashSet<_>>()
            .len();
        Ok(MemoryStats {
            papers,
            chunks: records.len(),
        })
    }
}

fn section_key(section: &str) -> String {
    section
        .trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedTrigramEmbedder;
    use crate::models::PaperMetadata;
    use crate::stores::LocalCollection;
    use crate::traits::CollectionHit;
    use async_trait::async_trait;
    use tempfile::{tempdir, TempDir};

    async fn memory() -> Result<(TempDir, ResearchMemory<LocalCollection, HashedTrigramEmbedder>), StoreError> {
        let dir = tempdir().map_err(|error| StoreError::unavailable("tempdir", error))?;
        let collection = LocalCollection::open(dir.path(), "research_papers").await?;
        Ok((dir, ResearchMemory::new(collection, HashedTrigramEmbedder::default())))
    }

    fn metadata(title: &str) -> PaperMetadata {
        PaperMetadata {
            title: title.to_string(),
            ..PaperMetadata::default()
        }
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|text| text.to_string()).collect()
    }

    #[tokio::test]
    async fn stored_chunks_come_back_in_order() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        let parts = chunks(&["alpha beta", "beta gamma", "gamma delta"]);

        let paper_id = memory
            .store("alpha beta gamma delta", &metadata("Ordered Paper"), Some(parts.as_slice()))
            .await?;
        let paper = memory.get_by_id(&paper_id).await?;

        let Some(paper) = paper else {
            panic!("stored paper should be found");
        };
        assert_eq!(paper.content, "alpha beta beta gamma gamma delta");
        assert_eq!(paper.chunk_count, 3);
        assert_eq!(paper.metadata.paper_id.as_deref(), Some(paper_id.as_str()));
        assert_eq!(paper.metadata.title, "Ordered Paper");
        Ok(())
    }

    #[tokio::test]
    async fn missing_chunks_store_full_content() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;

        let without = memory.store("whole text", &metadata("A"), None).await?;
        let empty = memory.store("other text", &metadata("B"), Some(&[][..])).await?;

        assert_eq!(memory.collection().count().await?, 2);
        let paper = memory.get_by_id(&without).await?;
        assert_eq!(paper.map(|paper| paper.content).as_deref(), Some("whole text"));
        let paper = memory.get_by_id(&empty).await?;
        assert_eq!(paper.map(|paper| paper.chunk_count), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn storing_twice_creates_two_papers() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        let first = memory.store("same text", &metadata("Same"), None).await?;
        let second = memory.store("same text", &metadata("Same"), None).await?;

        assert_ne!(first, second);
        assert_eq!(memory.list_all_metadata().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_id_is_absent() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        memory.store("text", &metadata("Known"), None).await?;

        assert!(memory.get_by_id("no-such-paper").await?.is_none());
        assert!(memory
            .update_metadata("no-such-paper", &MetadataUpdate::default())
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_counts_papers_not_chunks() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        memory
            .store("a", &metadata("First"), Some(chunks(&["a1", "a2", "a3", "a4"]).as_slice()))
            .await?;
        memory
            .store("b", &metadata("Second"), Some(chunks(&["b1", "b2"]).as_slice()))
            .await?;
        memory.store("c", &metadata("Third"), None).await?;

        let listed = memory.list_all_metadata().await?;
        let titles = listed.iter().map(|item| item.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
        assert_eq!(
            memory.stats().await?,
            MemoryStats {
                papers: 3,
                chunks: 7
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn search_returns_owning_paper_and_similarity() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        let folding = memory
            .store(
                "",
                &metadata("Folding"),
                Some(chunks(&[
                    "protein structure prediction with attention",
                    "transformers fold proteins accurately",
                ]).as_slice()),
            )
            .await?;
        memory
            .store(
                "",
                &metadata("Economics"),
                Some(chunks(&["inflation expectations and monetary policy"]).as_slice()),
            )
            .await?;

        let matches = memory.search_similar("protein folding transformers", 2).await?;
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|item| item.paper_id == folding));
        assert!(matches[0].similarity >= matches[1].similarity);
        assert!(matches
            .iter()
            .all(|item| (0.0..=1.0).contains(&item.similarity)));
        assert!(matches[0].record_id.starts_with(&folding));
        Ok(())
    }

    #[tokio::test]
    async fn processed_flag_is_visible_everywhere() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        let paper_id = memory
            .store("x y", &metadata("Flagged"), Some(chunks(&["x", "y"]).as_slice()))
            .await?;

        let updated = memory.mark_processed(&paper_id, "Key Findings").await?;
        let Some(updated) = updated else {
            panic!("paper should exist");
        };
        assert!(updated.processed);
        assert_eq!(
            updated.extra.get("processed_key_findings"),
            Some(&MetadataValue::Flag(true))
        );
        assert!(updated
            .extra
            .get("processed_at")
            .and_then(MetadataValue::as_timestamp)
            .is_some());

        let paper = memory.get_by_id(&paper_id).await?;
        assert!(paper.is_some_and(|paper| paper.metadata.processed));
        let listed = memory.list_all_metadata().await?;
        assert!(listed[0].processed);
        assert_eq!(listed[0].title, "Flagged");
        Ok(())
    }

    #[tokio::test]
    async fn field_named_extra_keys_update_the_field_and_reopen() -> Result<(), StoreError> {
        let (dir, memory) = memory().await?;
        let paper_id = memory
            .store("a b", &PaperMetadata::default(), Some(chunks(&["a", "b"]).as_slice()))
            .await?;

        let mut update = MetadataUpdate::default();
        update
            .extra
            .insert("title".to_string(), MetadataValue::from("Renamed"));
        update
            .extra
            .insert("published".to_string(), MetadataValue::from("2021-06-01T00:00:00Z"));

        let updated = memory.update_metadata(&paper_id, &update).await?;
        assert_eq!(updated.map(|metadata| metadata.title).as_deref(), Some("Renamed"));

        let reopened = ResearchMemory::new(
            LocalCollection::open(dir.path(), "research_papers").await?,
            HashedTrigramEmbedder::default(),
        );
        let Some(paper) = reopened.get_by_id(&paper_id).await? else {
            panic!("paper should survive reopen");
        };
        assert_eq!(paper.metadata.title, "Renamed");
        assert!(!paper.metadata.extra.contains_key("title"));
        assert_eq!(
            paper.metadata.extra.get("published"),
            Some(&MetadataValue::Text("2021-06-01T00:00:00Z".to_string()))
        );
        let listed = reopened.list_all_metadata().await?;
        assert_eq!(listed[0].title, "Renamed");
        Ok(())
    }

    #[tokio::test]
    async fn mistyped_update_is_rejected_without_writing() -> Result<(), StoreError> {
        let (_dir, memory) = memory().await?;
        let paper_id = memory.store("text", &metadata("Kept"), None).await?;

        let mut update = MetadataUpdate::default();
        update
            .extra
            .insert("processed".to_string(), MetadataValue::from("yes"));

        assert!(matches!(
            memory.update_metadata(&paper_id, &update).await,
            Err(StoreError::Request(_))
        ));
        let paper = memory.get_by_id(&paper_id).await?;
        assert!(paper.is_some_and(|paper| !paper.metadata.processed && paper.metadata.title == "Kept"));
        Ok(())
    }

    struct BrokenCollection;

    #[async_trait]
    impl ChunkCollection for BrokenCollection {
        async fn add(&self, _records: &[ChunkRecord], _embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
            Err(StoreError::unavailable("broken", "disk full"))
        }

        async fn query(&self, _query_vector: &[f32], _limit: usize) -> Result<Vec<CollectionHit>, StoreError> {
            Err(StoreError::unavailable("broken", "index offline"))
        }

        async fn get_by_paper(&self, _paper_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
            Err(StoreError::unavailable("broken", "index offline"))
        }

        async fn scan(&self) -> Result<Vec<ChunkRecord>, StoreError> {
            Err(StoreError::unavailable("broken", "index offline"))
        }

        async fn update_metadata(
            &self,
            _paper_id: &str,
            _metadata: &PaperMetadata,
        ) -> Result<usize, StoreError> {
            Err(StoreError::unavailable("broken", "index offline"))
        }

        async fn count(&self) -> Result<usize, StoreError> {
            Err(StoreError::unavailable("broken", "index offline"))
        }
    }

    #[tokio::test]
    async fn backend_failure_is_not_absence() {
        let memory = ResearchMemory::new(BrokenCollection, HashedTrigramEmbedder::default());

        assert!(matches!(
            memory.get_by_id("anything").await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(memory.store("text", &PaperMetadata::default(), None).await.is_err());
        assert!(memory.search_similar("query", 3).await.is_err());
        assert!(memory.list_all_metadata().await.is_err());
    }

    #[test]
    fn section_names_become_keys() {
        assert_eq!(section_key("Key Findings"), "key_findings");
        assert_eq!(section_key("  methods/results "), "methods_results");
    }
}
