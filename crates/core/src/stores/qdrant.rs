use crate::models::{ChunkRecord, PaperMetadata};
use crate::traits::{ChunkCollection, CollectionHit};
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

pub const DEFAULT_QDRANT_TIMEOUT: Duration = Duration::from_secs(30);

const SCROLL_PAGE_SIZE: usize = 256;

pub struct QdrantCollection {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantCollection {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client,
            vector_size,
        })
    }

    fn url(&self, suffix: &str) -> Result<Url, StoreError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{base}/collections/{}{suffix}",
            self.collection
        ))?)
    }

    /// Creates the cosine collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.url("")?).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url("/index?wait=true")?)
            .json(&json!({ "field_name": "paper_id", "field_schema": "keyword" }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        tracing::debug!(collection = %self.collection, "created qdrant collection");
        Ok(())
    }

    async fn post(&self, suffix: &str, body: Value) -> Result<Value, StoreError> {
        let response = self.client.post(self.url(suffix)?).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(response.json().await?)
    }

    async fn scroll(&self, filter: Option<Value>) -> Result<Vec<ChunkRecord>, StoreError> {
        let mut records = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(filter) = &filter {
                body["filter"] = filter.clone();
            }
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let parsed = self.post("/points/scroll", body).await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in points {
                records.push(payload_to_record(&point)?);
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                break;
            }
        }

        Ok(records)
    }
}

fn paper_filter(paper_id: &str) -> Value {
    json!({ "must": [{ "key": "paper_id", "match": { "value": paper_id } }] })
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn payload_to_record(point: &Value) -> Result<ChunkRecord, StoreError> {
    let record_id = point
        .pointer("/payload/record_id")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "point payload has no record_id".to_string(),
        })?
        .to_string();
    let document = point
        .pointer("/payload/document")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = point
        .pointer("/payload/metadata")
        .cloned()
        .map(serde_json::from_value::<PaperMetadata>)
        .transpose()?
        .unwrap_or_default();

    Ok(ChunkRecord {
        id: record_id,
        document,
        metadata,
    })
}

#[async_trait]
impl ChunkCollection for QdrantCollection {
    async fn add(&self, records: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
        if records.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match record count {}",
                embeddings.len(),
                records.len()
            )));
        }

        let points = records
            .iter()
            .zip(embeddings.iter())
            .map(|(record, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: embedding.len(),
                    });
                }

                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": embedding,
                    "payload": {
                        "record_id": record.id,
                        "paper_id": record.metadata.paper_id,
                        "document": record.document,
                        "metadata": serde_json::to_value(&record.metadata)?,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn query(&self, query_vector: &[f32], limit: usize) -> Result<Vec<CollectionHit>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let parsed = self
            .post(
                "/points/search",
                json!({
                    "vector": query_vector,
                    "limit": limit,
                    "with_payload": true,
                }),
            )
            .await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        hits.iter()
            .map(|hit| {
                // Qdrant reports cosine similarity; the trait speaks in distances.
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(CollectionHit {
                    record: payload_to_record(hit)?,
                    distance: 1.0 - score,
                })
            })
            .collect()
    }

    async fn get_by_paper(&self, paper_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        self.scroll(Some(paper_filter(paper_id))).await
    }

    async fn scan(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        self.scroll(None).await
    }

    async fn update_metadata(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<usize, StoreError> {
        let touched = self.count_matching(Some(paper_filter(paper_id))).await?;
        if touched == 0 {
            return Ok(0);
        }

        self.post(
            "/points/payload?wait=true",
            json!({
                "payload": { "metadata": serde_json::to_value(metadata)? },
                "filter": paper_filter(paper_id),
            }),
        )
        .await?;

        Ok(touched)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.count_matching(None).await
    }
}

impl QdrantCollection {
    async fn count_matching(&self, filter: Option<Value>) -> Result<usize, StoreError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let parsed = self.post("/points/count", body).await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_endpoint() {
        let result = QdrantCollection::new("not a url", "papers", 8, DEFAULT_QDRANT_TIMEOUT);
        assert!(matches!(result, Err(StoreError::Url(_))));
    }

    #[test]
    fn collection_urls_ignore_trailing_slash() -> Result<(), StoreError> {
        let store = QdrantCollection::new("http://localhost:6333/", "papers", 8, DEFAULT_QDRANT_TIMEOUT)?;
        assert_eq!(
            store.url("/points/scroll")?.as_str(),
            "http://localhost:6333/collections/papers/points/scroll"
        );
        Ok(())
    }

    #[test]
    fn payload_maps_back_to_record() -> Result<(), StoreError> {
        let point = json!({
            "id": "6f1c1a8e-7f57-4a53-9c39-5a4c4b0f1e11",
            "score": 0.8,
            "payload": {
                "record_id": "paper-1_3",
                "paper_id": "paper-1",
                "document": "chunk text",
                "metadata": {
                    "paper_id": "paper-1",
                    "title": "Attention Is All You Need",
                    "authors": "Ashish Vaswani",
                    "year": "2017",
                    "processed": false,
                    "file_name": "attention.pdf"
                }
            }
        });

        let record = payload_to_record(&point)?;
        assert_eq!(record.paper_id(), "paper-1");
        assert_eq!(record.sequence(), Some(3));
        assert_eq!(record.metadata.year, "2017");
        assert!(record.metadata.extra.contains_key("file_name"));
        Ok(())
    }

    #[test]
    fn payload_without_record_id_is_rejected() {
        let point = json!({ "payload": { "document": "x" } });
        assert!(matches!(
            payload_to_record(&point),
            Err(StoreError::BackendResponse { .. })
        ));
    }
}
