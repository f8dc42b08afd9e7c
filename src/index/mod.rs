//! Similarity search and persistence of content units over a vector
//! database collection.
//!
//! Each [`ContentUnit`] is embedded and stored as a single chunk. The
//! collection's vector dimension must match the embedder's; a mismatch shows
//! up as a store error on insert or search.


use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::Result;
use crate::content::{ContentMetadata, ContentUnit};
use crate::database::lancedb::{IndexRecord, MetadataFilter, VectorBackend};
use crate::embeddings::Embedder;

/// A chunk returned by [`IndexStore::search`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedSource {
    pub text: String,
    pub score: f32,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub points_count: usize,
    pub dimension: usize,
}

pub struct IndexStore {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl std::fmt::Debug for IndexStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("collection", &self.collection)
            .field("dimension", &self.embedder.dimension())
            .finish_non_exhaustive()
    }
}

impl IndexStore {
    #[inline]
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            embedder,
            collection: collection.into(),
        }
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection if it does not exist yet
    #[inline]
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.backend.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        self.backend
            .create_collection(&self.collection, self.embedder.dimension())
            .await?;
        info!("Created collection: {}", self.collection);
        Ok(())
    }

    /// Embed and insert every unit as one chunk; returns the number inserted
    #[inline]
    pub async fn add_units(&self, units: &[ContentUnit]) -> Result<usize> {
        if units.is_empty() {
            return Ok(0);
        }

        self.ensure_collection().await?;

        let texts: Vec<String> = units.iter().map(|unit| unit.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let records: Vec<IndexRecord> = units
            .iter()
            .zip(vectors)
            .map(|(unit, vector)| IndexRecord {
                id: Uuid::new_v4().to_string(),
                vector,
                text: unit.text.clone(),
                metadata: unit.metadata.clone(),
            })
            .collect();

        let inserted = self.backend.insert(&self.collection, records).await?;
        info!("Added {} units to {}", inserted, self.collection);
        Ok(inserted)
    }

    /// Top-K chunks most similar to `query`, best first.
    ///
    /// Any failure is logged and yields an empty list.
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Vec<RetrievedSource> {
        match self.try_search(query, top_k, filter).await {
            Ok(results) => results,
            Err(e) => {
                error!("Search failed in {}: {}", self.collection, e);
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedSource>> {
        let vector = self.embedder.embed_query(query).await?;
        let records = self
            .backend
            .search(&self.collection, &vector, top_k, filter)
            .await?;

        debug!("Search returned {} results", records.len());
        Ok(records
            .into_iter()
            .map(|record| RetrievedSource {
                text: record.text,
                score: record.score,
                metadata: record.metadata,
            })
            .collect())
    }

    /// Drop the collection with all its data and create it again empty
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        self.backend.delete_collection(&self.collection).await?;
        self.backend
            .create_collection(&self.collection, self.embedder.dimension())
            .await?;
        info!("Cleared collection: {}", self.collection);
        Ok(())
    }

    #[inline]
    pub async fn stats(&self) -> Result<IndexStats> {
        let points_count = if self.backend.collection_exists(&self.collection).await? {
            self.backend.count(&self.collection).await?
        } else {
            0
        };

        Ok(IndexStats {
            collection: self.collection.clone(),
            points_count,
            dimension: self.embedder.dimension(),
        })
    }
}
