//! Directory-backed collection for single-machine use.
//!
//! Each collection is one JSON file inside the store directory. Writes go to a
//! sibling temp file that is renamed over the original, so a crash leaves either
//! the old or the new contents on disk. Search is a brute-force cosine scan.

use crate::embeddings::cosine_distance;
use crate::models::{ChunkRecord, PaperMetadata};
use crate::traits::{ChunkCollection, CollectionHit};
use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    dimensions: Option<usize>,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    record: ChunkRecord,
    embedding: Vec<f32>,
}

pub struct LocalCollection {
    path: PathBuf,
    state: Mutex<CollectionFile>,
}

impl LocalCollection {
    /// Opens `name` under `dir`, creating the directory when missing.
    pub async fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        if name.trim().is_empty() {
            return Err(StoreError::Request("collection name is empty".to_string()));
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|error| StoreError::unavailable(dir.display().to_string(), error))?;

        let path = dir.join(format!("{name}.json"));
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<CollectionFile>(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => CollectionFile {
                name: name.to_string(),
                ..CollectionFile::default()
            },
            Err(error) => return Err(StoreError::unavailable(path.display().to_string(), error)),
        };

        tracing::debug!(
            path = %path.display(),
            records = state.records.len(),
            "opened local collection"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &CollectionFile) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(state)?;
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|error| StoreError::unavailable(temp.display().to_string(), error))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|error| StoreError::unavailable(self.path.display().to_string(), error))
    }
}

fn belongs_to(record: &ChunkRecord, paper_id: &str) -> bool {
    record.metadata.paper_id.as_deref() == Some(paper_id)
}

#[async_trait]
impl ChunkCollection for LocalCollection {
    async fn add(&self, records: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
        if records.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match record count {}",
                embeddings.len(),
                records.len()
            )));
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let expected = state.dimensions.unwrap_or(embeddings[0].len());
        if let Some(bad) = embeddings.iter().find(|embedding| embedding.len() != expected) {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let duplicate = {
            let existing: HashSet<&str> = state
                .records
                .iter()
                .map(|stored| stored.record.id.as_str())
                .collect();
            records
                .iter()
                .find(|record| existing.contains(record.id.as_str()))
                .map(|record| record.id.clone())
        };
        if let Some(duplicate) = duplicate {
            return Err(StoreError::Request(format!(
                "record id {duplicate} already exists"
            )));
        }

        let previous_len = state.records.len();
        let previous_dimensions = state.dimensions;
        state.dimensions = Some(expected);
        state.records.extend(
            records
                .iter()
                .zip(embeddings)
                .map(|(record, embedding)| StoredRecord {
                    record: record.clone(),
                    embedding: embedding.clone(),
                }),
        );

        if let Err(error) = self.persist(&state).await {
            state.records.truncate(previous_len);
            state.dimensions = previous_dimensions;
            return Err(error);
        }

        Ok(())
    }

    async fn query(&self, query_vector: &[f32], limit: usize) -> Result<Vec<CollectionHit>, StoreError> {
        let state = self.state.lock().await;
        if let Some(expected) = state.dimensions {
            if query_vector.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }

        let mut scored = state
            .records
            .iter()
            .map(|stored| (cosine_distance(query_vector, &stored.embedding), stored))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| left.0.total_cmp(&right.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(distance, stored)| CollectionHit {
                record: stored.record.clone(),
                distance: f64::from(distance),
            })
            .collect())
    }

    async fn get_by_paper(&self, paper_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|stored| belongs_to(&stored.record, paper_id))
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn scan(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn update_metadata(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut previous = Vec::new();
        for (index, stored) in state.records.iter_mut().enumerate() {
            if belongs_to(&stored.record, paper_id) {
                let old = std::mem::replace(&mut stored.record.metadata, metadata.clone());
                previous.push((index, old));
            }
        }

        if previous.is_empty() {
            return Ok(0);
        }

        if let Err(error) = self.persist(&state).await {
            for (index, old) in previous {
                state.records[index].record.metadata = old;
            }
            return Err(error);
        }

        Ok(previous.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record_id;
    use tempfile::tempdir;

    fn record(paper_id: &str, index: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: record_id(paper_id, index),
            document: text.to_string(),
            metadata: PaperMetadata {
                paper_id: Some(paper_id.to_string()),
                ..PaperMetadata::default()
            },
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let collection = LocalCollection::open(dir.path(), "papers").await?;
            collection
                .add(
                    &[record("p1", 0, "first"), record("p1", 1, "second")],
                    &[vec![1.0, 0.0], vec![0.0, 1.0]],
                )
                .await?;
        }

        let reopened = LocalCollection::open(dir.path(), "papers").await?;
        assert!(reopened.path().ends_with("papers.json"));
        assert_eq!(reopened.count().await?, 2);
        let records = reopened.get_by_paper("p1").await?;
        assert_eq!(records[0].document, "first");
        assert_eq!(records[1].document, "second");
        Ok(())
    }

    #[tokio::test]
    async fn query_orders_by_ascending_distance() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = LocalCollection::open(dir.path(), "papers").await?;
        collection
            .add(
                &[record("a", 0, "far"), record("b", 0, "near"), record("c", 0, "middle")],
                &[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
            )
            .await?;

        let hits = collection.query(&[1.0, 0.0], 2).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.document, "near");
        assert!(hits[0].distance.abs() < 1e-6);
        assert_eq!(hits[1].record.document, "middle");
        Ok(())
    }

    #[tokio::test]
    async fn rejects_mismatched_dimensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = LocalCollection::open(dir.path(), "papers").await?;
        collection.add(&[record("a", 0, "x")], &[vec![1.0, 0.0]]).await?;

        let result = collection.add(&[record("b", 0, "y")], &[vec![1.0, 0.0, 0.0]]).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(collection.query(&[1.0], 1).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_duplicate_record_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = LocalCollection::open(dir.path(), "papers").await?;
        collection.add(&[record("a", 0, "x")], &[vec![1.0]]).await?;

        let result = collection.add(&[record("a", 0, "x")], &[vec![1.0]]).await;
        assert!(matches!(result, Err(StoreError::Request(_))));
        assert_eq!(collection.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn metadata_update_touches_only_one_paper() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = LocalCollection::open(dir.path(), "papers").await?;
        collection
            .add(
                &[record("a", 0, "x"), record("a", 1, "y"), record("b", 0, "z")],
                &[vec![1.0], vec![1.0], vec![1.0]],
            )
            .await?;

        let updated = PaperMetadata {
            paper_id: Some("a".to_string()),
            processed: true,
            ..PaperMetadata::default()
        };
        assert_eq!(collection.update_metadata("a", &updated).await?, 2);
        assert_eq!(collection.update_metadata("missing", &updated).await?, 0);

        let records = collection.scan().await?;
        assert!(records[0].metadata.processed);
        assert!(records[1].metadata.processed);
        assert!(!records[2].metadata.processed);
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_directory_is_a_store_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file")?;

        let result = LocalCollection::open(&blocker, "papers").await;
        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
        Ok(())
    }
}
