use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::chunking::ChunkingConfig;
use crate::StoreError;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_AUTHORS: &str = "Unknown Authors";
pub const UNKNOWN_YEAR: &str = "Unknown Year";

pub const DEFAULT_STORE_DIR: &str = "./paper_memory";
pub const DEFAULT_COLLECTION: &str = "research_papers";

/// Loosely typed value for metadata keys without a dedicated field.
///
/// Timestamps are kept as RFC 3339 text so a value always comes back from
/// storage with the variant it was written with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Parses a text value as an RFC 3339 timestamp.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.as_text()?)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc))
    }

    fn into_text(self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Flag(value) => Some(value.to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Text(value) => Some(value),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Metadata attached to every chunk record of a paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    pub title: String,
    pub authors: String,
    pub year: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, MetadataValue>,
}

impl Default for PaperMetadata {
    fn default() -> Self {
        Self {
            paper_id: None,
            title: UNKNOWN_TITLE.to_string(),
            authors: UNKNOWN_AUTHORS.to_string(),
            year: UNKNOWN_YEAR.to_string(),
            file_path: None,
            processed: false,
            extracted_at: None,
            ingested_at: None,
            extra: BTreeMap::new(),
        }
    }
}

impl PaperMetadata {
    /// Sets `key` to `value`. Keys naming a dedicated field are written to that
    /// field, so `extra` never holds a key that collides with one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "paper_id" => self.paper_id = Some(required_text(&key, value)?),
            "title" => self.title = required_text(&key, value)?,
            "authors" => self.authors = required_text(&key, value)?,
            "year" => self.year = required_text(&key, value)?,
            "file_path" => self.file_path = value.into_text(),
            "processed" => {
                self.processed = value
                    .as_flag()
                    .ok_or_else(|| wrong_type(&key, "a flag", &value))?;
            }
            "extracted_at" => self.extracted_at = Some(required_timestamp(&key, &value)?),
            "ingested_at" => self.ingested_at = Some(required_timestamp(&key, &value)?),
            _ => {
                self.extra.insert(key, value);
            }
        }
        Ok(())
    }

    /// Merges `update` into this metadata. Explicit fields win over extra keys
    /// with the same name. Nothing is written if a value has the wrong type.
    pub fn apply(&mut self, update: &MetadataUpdate) -> Result<(), StoreError> {
        let mut merged = self.clone();
        for (key, value) in &update.extra {
            merged.insert(key.clone(), value.clone())?;
        }
        if let Some(title) = &update.title {
            merged.title = title.clone();
        }
        if let Some(authors) = &update.authors {
            merged.authors = authors.clone();
        }
        if let Some(year) = &update.year {
            merged.year = year.clone();
        }
        if let Some(file_path) = &update.file_path {
            merged.file_path = Some(file_path.clone());
        }
        if let Some(processed) = update.processed {
            merged.processed = processed;
        }
        *self = merged;
        Ok(())
    }
}

fn wrong_type(key: &str, expected: &str, value: &MetadataValue) -> StoreError {
    StoreError::Request(format!("metadata key {key} expects {expected}, got {value:?}"))
}

fn required_text(key: &str, value: MetadataValue) -> Result<String, StoreError> {
    value
        .into_text()
        .ok_or_else(|| wrong_type(key, "a value", &MetadataValue::Null))
}

fn required_timestamp(key: &str, value: &MetadataValue) -> Result<DateTime<Utc>, StoreError> {
    value
        .as_timestamp()
        .ok_or_else(|| wrong_type(key, "an RFC 3339 timestamp", value))
}

/// Partial metadata change. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub year: Option<String>,
    pub file_path: Option<String>,
    pub processed: Option<bool>,
    pub extra: BTreeMap<String, MetadataValue>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.authors.is_none()
            && self.year.is_none()
            && self.file_path.is_none()
            && self.processed.is_none()
            && self.extra.is_empty()
    }
}

/// One stored unit of the collection: a chunk of a paper plus a metadata copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub document: String,
    pub metadata: PaperMetadata,
}

impl ChunkRecord {
    /// Owning paper id, recovered from the synthetic record id.
    pub fn paper_id(&self) -> &str {
        split_record_id(&self.id).0
    }

    pub fn sequence(&self) -> Option<usize> {
        split_record_id(&self.id).1
    }
}

pub fn record_id(paper_id: &str, index: usize) -> String {
    format!("{paper_id}_{index}")
}

/// Splits `{paper_id}_{index}` on the last underscore. Ids without a numeric
/// suffix are returned whole.
pub fn split_record_id(id: &str) -> (&str, Option<usize>) {
    match id.rsplit_once('_') {
        Some((paper_id, suffix)) => match suffix.parse::<usize>() {
            Ok(index) => (paper_id, Some(index)),
            Err(_) => (id, None),
        },
        None => (id, None),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarPaper {
    pub paper_id: String,
    pub record_id: String,
    pub content: String,
    pub metadata: PaperMetadata,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPaper {
    pub paper_id: String,
    pub content: String,
    pub metadata: PaperMetadata,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryStats {
    pub papers: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub store_dir: PathBuf,
    pub collection: String,
    pub chunking: ChunkingConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            collection: DEFAULT_COLLECTION.to_string(),
            chunking: ChunkingConfig::default(),
        }
    }
}
