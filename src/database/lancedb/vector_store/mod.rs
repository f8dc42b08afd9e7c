
use super::{IndexRecord, MetadataFilter, ScoredRecord, VectorBackend, filter_predicate};
use crate::content::{ContentMetadata, ContentType};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// LanceDB-backed vector store; each collection is a table in one database directory
pub struct LanceVectorStore {
    connection: Connection,
}

impl std::fmt::Debug for LanceVectorStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceVectorStore").finish_non_exhaustive()
    }
}

impl LanceVectorStore {
    /// Open (or create) the vector database stored under `db_path`
    #[inline]
    pub async fn connect(db_path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = db_path.display().to_string();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        Ok(Self { connection })
    }

    /// Schema of a collection holding vectors of `vector_dim` floats
    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, true),
            Field::new("filename", DataType::Utf8, true),
            Field::new("content_type", DataType::Utf8, false),
            Field::new("length", DataType::UInt32, false),
        ]))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open collection {}: {}", name, e)))
    }

    /// Read the vector dimension from an existing table's schema
    async fn table_dimension(table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(RagError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Create a RecordBatch from index records
    fn create_record_batch(records: &[IndexRecord], vector_dim: usize) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut texts = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut titles = Vec::with_capacity(len);
        let mut descriptions = Vec::with_capacity(len);
        let mut urls = Vec::with_capacity(len);
        let mut filenames = Vec::with_capacity(len);
        let mut content_types = Vec::with_capacity(len);
        let mut lengths = Vec::with_capacity(len);

        for record in records {
            if record.vector.len() != vector_dim {
                return Err(RagError::Database(format!(
                    "Vector dimension mismatch: collection expects {}, got {}",
                    vector_dim,
                    record.vector.len()
                )));
            }

            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            texts.push(record.text.as_str());
            sources.push(record.metadata.source.as_str());
            titles.push(record.metadata.title.as_str());
            descriptions.push(record.metadata.description.as_str());
            urls.push(record.metadata.url.as_deref());
            filenames.push(record.metadata.filename.as_deref());
            content_types.push(record.metadata.content_type.as_str());
            lengths.push(u32::try_from(record.metadata.length).unwrap_or(u32::MAX));
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| {
                    RagError::Database(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(descriptions)),
            Arc::new(StringArray::from(urls)),
            Arc::new(StringArray::from(filenames)),
            Arc::new(StringArray::from(content_types)),
            Arc::new(UInt32Array::from(lengths)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredRecord>> {
        let ids = string_column(batch, "id")?;
        let texts = string_column(batch, "text")?;
        let sources = string_column(batch, "source")?;
        let titles = string_column(batch, "title")?;
        let descriptions = string_column(batch, "description")?;
        let urls = string_column(batch, "url")?;
        let filenames = string_column(batch, "filename")?;
        let content_types = string_column(batch, "content_type")?;
        let lengths = batch
            .column_by_name("length")
            .ok_or_else(|| RagError::Database("Missing length column".to_string()))?
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| RagError::Database("Invalid length column type".to_string()))?;

        // Extract distance scores if available
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let content_type = ContentType::parse(content_types.value(row)).ok_or_else(|| {
                RagError::Database(format!(
                    "Unknown content type in collection: {}",
                    content_types.value(row)
                ))
            })?;

            let metadata = ContentMetadata {
                source: sources.value(row).to_string(),
                title: titles.value(row).to_string(),
                description: descriptions.value(row).to_string(),
                url: optional_value(urls, row),
                filename: optional_value(filenames, row),
                content_type,
                length: lengths.value(row) as usize,
            };

            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            results.push(ScoredRecord {
                id: ids.value(row).to_string(),
                text: texts.value(row).to_string(),
                metadata,
                // Cosine distance to similarity
                score: 1.0 - distance,
            });
        }

        Ok(results)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn optional_value(column: &StringArray, row: usize) -> Option<String> {
    if column.is_null(row) {
        None
    } else {
        Some(column.value(row).to_string())
    }
}

#[async_trait]
impl VectorBackend for LanceVectorStore {
    #[inline]
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        Ok(table_names.iter().any(|table| table == name))
    }

    #[inline]
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        info!(
            "Creating collection {} with {} dimensions",
            name, dimension
        );

        self.connection
            .create_empty_table(name, Self::create_schema(dimension))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    #[inline]
    async fn delete_collection(&self, name: &str) -> Result<()> {
        if !self.collection_exists(name).await? {
            return Ok(());
        }

        info!("Dropping collection {}", name);
        self.connection
            .drop_table(name)
            .await
            .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))
    }

    #[inline]
    async fn insert(&self, name: &str, records: Vec<IndexRecord>) -> Result<usize> {
        if records.is_empty() {
            debug!("No records to store");
            return Ok(0);
        }

        let table = self.open_table(name).await?;
        let vector_dim = Self::table_dimension(&table).await?;
        let record_batch = Self::create_record_batch(&records, vector_dim)?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert records: {}", e)))?;

        debug!("Stored {} records in {}", records.len(), name);
        Ok(records.len())
    }

    #[inline]
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>> {
        debug!("Searching {} with limit: {}", name, top_k);

        let table = self.open_table(name).await?;
        let mut query = table
            .vector_search(vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        if let Some(predicate) = filter_predicate(filter)? {
            query = query.only_if(predicate);
        }

        let mut stream = query
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            results.extend(Self::parse_search_batch(&batch)?);
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    #[inline]
    async fn count(&self, name: &str) -> Result<usize> {
        let table = self.open_table(name).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))
    }
}
