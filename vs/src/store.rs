//! Core VectorStore implementation

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A scalar metadata value
///
/// The store accepts scalars only; callers stringify anything structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    /// String form regardless of variant
    pub fn as_text(&self) -> String {
        match self {
            MetaValue::Bool(b) => b.to_string(),
            MetaValue::Int(i) => i.to_string(),
            MetaValue::Float(f) => f.to_string(),
            MetaValue::Str(s) => s.clone(),
        }
    }

    /// Boolean view, false for non-bool variants
    pub fn as_bool(&self) -> bool {
        matches!(self, MetaValue::Bool(true))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

/// Scalar-valued metadata map (sorted for stable serialization)
pub type Metadata = BTreeMap<String, MetaValue>;

/// A stored record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique record ID
    pub id: String,
    /// Free-text content
    pub content: String,
    /// Mime type ("text/plain" for everything the orchestrator stores)
    pub mime_type: String,
    /// Scalar metadata
    pub metadata: Metadata,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

/// A query result: a record plus its distance from the query text
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// 0 (identical coverage) .. 100 (no overlap)
    pub distance: f64,
}

impl Hit {
    /// Similarity on the consumer contract: `max(0, 1 - distance/100)`
    pub fn similarity(&self) -> f64 {
        (1.0 - self.distance / 100.0).max(0.0)
    }
}

/// Aggregate store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub record_count: usize,
    pub total_bytes: u64,
}

/// The main store: an append-only record log with ranked retrieval
pub struct VectorStore {
    base_path: PathBuf,
    records: Vec<Record>,
}

impl VectorStore {
    /// Open or create a store at the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let records = Self::load_records(&base_path.join("records.jsonl"))?;
        debug!(?base_path, count = records.len(), "Opened vector store");

        Ok(Self { base_path, records })
    }

    fn load_records(path: &Path) -> Result<Vec<Record>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        Ok(records)
    }

    /// Add a record; returns its ID
    pub fn add(&mut self, content: &str, mime_type: &str, metadata: Metadata) -> Result<String, StoreError> {
        let record = Record {
            id: Uuid::now_v7().to_string(),
            content: content.to_string(),
            mime_type: mime_type.to_string(),
            metadata,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.base_path.join("records.jsonl"))?;
        writeln!(file, "{}", line)?;

        let id = record.id.clone();
        self.records.push(record);

        Ok(id)
    }

    /// Query for the top-k closest records to the given text
    ///
    /// Results are sorted by ascending distance. Ties keep insertion order.
    pub fn query(&self, text: &str, top_k: usize) -> Vec<Hit> {
        let query_tokens = tokenize(text);

        let mut hits: Vec<Hit> = self
            .records
            .iter()
            .map(|r| Hit {
                id: r.id.clone(),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                distance: token_distance(&query_tokens, &tokenize(&r.content)),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in insertion order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Aggregate statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            record_count: self.records.len(),
            total_bytes: self.records.iter().map(|r| r.content.len() as u64).sum(),
        }
    }

    /// Delete a single record by id; returns whether it existed
    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);

        if self.records.len() == before {
            return Ok(false);
        }

        self.rewrite_records()?;
        info!(id, "Deleted record");
        Ok(true)
    }

    /// Delete all records and the backing file
    pub fn clear(&mut self) -> Result<(), StoreError> {
        let path = self.base_path.join("records.jsonl");
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.records.clear();
        info!(path = %self.base_path.display(), "Cleared vector store");
        Ok(())
    }

    fn rewrite_records(&self) -> Result<(), StoreError> {
        let mut file = fs::File::create(self.base_path.join("records.jsonl"))?;
        for record in &self.records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        Ok(())
    }
}

/// Lowercased alphanumeric tokens of a text
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distance between query tokens and document tokens, scaled to 0-100
///
/// Measures how much of the query the document covers: 0 when every query
/// token appears in the document, 100 when none do.
fn token_distance(query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 100.0;
    }
    let covered = query.intersection(doc).count();
    (1.0 - covered as f64 / query.len() as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(pairs: &[(&str, MetaValue)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_add_and_query() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();

        store
            .add(
                "Agent: writer task completed successfully",
                crate::MIME_TEXT,
                meta(&[("agent_name", "writer".into())]),
            )
            .unwrap();
        store
            .add(
                "Agent: test_runner assertion failure in string tests",
                crate::MIME_TEXT,
                meta(&[("agent_name", "test_runner".into())]),
            )
            .unwrap();

        let hits = store.query("assertion failure", 10);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("assertion"));
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn test_similarity_contract() {
        let hit = Hit {
            id: "x".to_string(),
            content: String::new(),
            metadata: Metadata::new(),
            distance: 25.0,
        };
        assert!((hit.similarity() - 0.75).abs() < f64::EPSILON);

        let far = Hit { distance: 150.0, ..hit };
        assert_eq!(far.similarity(), 0.0);
    }

    #[test]
    fn test_persistence_across_open() {
        let temp = TempDir::new().unwrap();

        let id = {
            let mut store = VectorStore::open(temp.path()).unwrap();
            store.add("persisted content", crate::MIME_TEXT, Metadata::new()).unwrap()
        };

        let store = VectorStore::open(temp.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].id, id);
        assert_eq!(store.records()[0].content, "persisted content");
    }

    #[test]
    fn test_query_ranking_and_truncation() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();

        store.add("alpha beta gamma", crate::MIME_TEXT, Metadata::new()).unwrap();
        store.add("alpha beta", crate::MIME_TEXT, Metadata::new()).unwrap();
        store.add("unrelated text entirely", crate::MIME_TEXT, Metadata::new()).unwrap();

        let hits = store.query("alpha beta gamma", 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits[1].distance > 0.0);
    }

    #[test]
    fn test_metadata_round_trip() {
        let temp = TempDir::new().unwrap();

        {
            let mut store = VectorStore::open(temp.path()).unwrap();
            store
                .add(
                    "record with metadata",
                    crate::MIME_TEXT,
                    meta(&[
                        ("success", true.into()),
                        ("duration", 1.5.into()),
                        ("agent_name", "scanner".into()),
                    ]),
                )
                .unwrap();
        }

        let store = VectorStore::open(temp.path()).unwrap();
        let record = &store.records()[0];
        assert!(record.metadata["success"].as_bool());
        assert_eq!(record.metadata["agent_name"].as_str(), Some("scanner"));
    }

    #[test]
    fn test_delete_single_record() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();

        let keep = store.add("record to keep", crate::MIME_TEXT, Metadata::new()).unwrap();
        let doomed = store.add("record to delete", crate::MIME_TEXT, Metadata::new()).unwrap();

        assert!(store.delete(&doomed).unwrap());
        assert_eq!(store.len(), 1);

        // Unknown ids are reported, not an error
        assert!(!store.delete("no-such-id").unwrap());

        // The removal persists across reopen
        let reopened = VectorStore::open(temp.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.records()[0].id, keep);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();

        store.add("something", crate::MIME_TEXT, Metadata::new()).unwrap();
        assert_eq!(store.len(), 1);

        store.clear().unwrap();
        assert!(store.is_empty());

        let reopened = VectorStore::open(temp.path()).unwrap();
        assert!(reopened.is_empty());
    }
}
