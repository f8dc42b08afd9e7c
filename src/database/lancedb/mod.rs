// Vector database access
// Collections are LanceDB tables holding one row per indexed chunk


pub mod vector_store;

use async_trait::async_trait;
use std::collections::BTreeMap;

pub use self::vector_store::LanceVectorStore;
use crate::content::{ContentMetadata, FILTERABLE_FIELDS};
use crate::{RagError, Result};

/// Exact-match metadata filters, keyed by field name
pub type MetadataFilter = BTreeMap<String, String>;

/// A chunk ready to be written to a collection
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Opaque id assigned by the caller
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ContentMetadata,
}

/// A chunk returned by a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: ContentMetadata,
    /// Cosine similarity, higher is closer
    pub score: f32,
}

/// Narrow contract over the external vector database
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create an empty collection for vectors of `dimension` floats, compared by cosine distance
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Drop a collection; dropping a missing collection is not an error
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Append records; returns how many were written
    async fn insert(&self, name: &str, records: Vec<IndexRecord>) -> Result<usize>;

    /// Top-K records by cosine similarity, best first
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>>;

    async fn count(&self, name: &str) -> Result<usize>;
}

/// Translate metadata filters into a SQL predicate over the collection columns.
///
/// Returns `None` for an empty filter. Unknown field names are rejected.
#[inline]
pub fn filter_predicate(filter: &MetadataFilter) -> Result<Option<String>> {
    if filter.is_empty() {
        return Ok(None);
    }

    let mut clauses = Vec::with_capacity(filter.len());
    for (field, value) in filter {
        if !FILTERABLE_FIELDS.contains(&field.as_str()) {
            return Err(RagError::Database(format!(
                "Cannot filter on unknown field: {}",
                field
            )));
        }
        clauses.push(format!("{} = '{}'", field, value.replace('\'', "''")));
    }

    Ok(Some(clauses.join(" AND ")))
}
