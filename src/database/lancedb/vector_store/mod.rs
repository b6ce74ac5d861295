
use super::{ChunkMetadata, VectorRecord};
use crate::{TutorError, config::Config};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Vector table backed by LanceDB, searched with exact cosine distance
///
/// Rows are appended in chunk_seq order. The table carries no ANN index:
/// unindexed LanceDB tables are scanned exhaustively, which keeps search
/// results exact. Over unit-length vectors the cosine similarity reported
/// here equals the inner product.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: Option<usize>,
    default_dimension: usize,
}

/// Search hit from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_seq: i64,
    pub metadata: ChunkMetadata,
    pub similarity_score: f32,
    pub distance: f32,
}

impl VectorStore {
    /// Create a new VectorStore instance
    ///
    /// # Arguments
    /// * `config` - Application configuration containing database paths
    ///
    /// # Returns
    /// * `Result<Self, TutorError>` - New VectorStore instance or error
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, TutorError> {
        let db_path = config.vector_database_path();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        // Ensure the directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TutorError::Database(format!("Failed to create vector database directory: {}", e))
            })?;
        }

        let uri = format!("file://{}", db_path.display());

        // Attempt to connect with corruption recovery
        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                // Check if this looks like a corruption error
                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("malformed")
                {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(&db_path)?;

                    // Retry connection after recovery
                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        TutorError::Database(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(TutorError::Database(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        let mut store = Self {
            connection,
            table_name: "embeddings".to_string(),
            vector_dimension: None,
            default_dimension: config.ollama.embedding_dimension as usize,
        };

        // Initialize the table if it doesn't exist with corruption handling
        store.initialize_table_with_recovery().await?;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    /// Initialize the embeddings table with the correct schema
    async fn initialize_table(&mut self) -> Result<(), TutorError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            debug!("Embeddings table already exists, detecting vector dimension");
            match self.detect_existing_vector_dimension().await {
                Ok(dim) => {
                    self.vector_dimension = Some(dim);
                    info!("Detected existing vector dimension: {}", dim);
                }
                Err(e) => {
                    warn!(
                        "Could not detect vector dimension from existing table: {}",
                        e
                    );
                    self.vector_dimension = Some(self.default_dimension);
                }
            }
            return Ok(());
        }

        // The table is recreated with the observed dimension on first insert,
        // so the configured dimension only seeds the empty schema
        let schema = self.create_schema(self.default_dimension);

        self.connection
            .create_empty_table(&self.table_name, schema)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to create table: {}", e)))?;

        self.vector_dimension = Some(self.default_dimension);
        info!(
            "Embeddings table created with {} dimensions",
            self.default_dimension
        );
        Ok(())
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize, TutorError> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open existing table: {}", e)))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to get table schema: {}", e)))?;

        // Find the vector column and extract its dimension
        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(TutorError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Create schema with the specified vector dimension
    fn create_schema(&self, vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("chunk_seq", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("document_id", DataType::Int64, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("page", DataType::Int64, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    /// Store multiple embeddings in a batch
    ///
    /// # Arguments
    /// * `records` - Vector of embedding records to store
    ///
    /// # Returns
    /// * `Result<(), TutorError>` - Success or error
    #[inline]
    pub async fn store_embeddings_batch(
        &mut self,
        records: Vec<VectorRecord>,
    ) -> Result<(), TutorError> {
        if records.is_empty() {
            debug!("No embeddings to store");
            return Ok(());
        }

        debug!("Storing batch of {} embeddings", records.len());

        // Auto-detect vector dimension from first record and recreate table if needed
        let vector_dim = records[0].vector.len();
        if self.vector_dimension != Some(vector_dim) {
            info!(
                "Vector dimension changed from {:?} to {}, recreating table",
                self.vector_dimension, vector_dim
            );
            self.recreate_table_with_dimension(vector_dim).await?;
            self.vector_dimension = Some(vector_dim);
        }

        let record_batch = self.create_record_batch(&records)?;

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to insert embeddings: {}", e)))?;

        info!("Successfully stored {} embeddings", records.len());
        Ok(())
    }

    /// Recreate table with new vector dimension
    async fn recreate_table_with_dimension(&self, vector_dim: usize) -> Result<(), TutorError> {
        info!("Recreating table with vector dimension: {}", vector_dim);

        // Drop existing table
        self.drop_table_if_exists().await?;

        // Create new table with correct schema
        let schema = self.create_schema(vector_dim);
        self.connection
            .create_empty_table(&self.table_name, schema)
            .execute()
            .await
            .map_err(|e| {
                TutorError::Database(format!("Failed to create table with new dimensions: {}", e))
            })?;

        info!(
            "Table recreated successfully with {} dimensions",
            vector_dim
        );
        Ok(())
    }

    /// Create a RecordBatch from embedding records
    fn create_record_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch, TutorError> {
        let len = records.len();
        let vector_dim = self
            .vector_dimension
            .ok_or_else(|| TutorError::Database("Vector dimension not set".to_string()))?;

        let mut chunk_seqs = Vec::with_capacity(len);
        let mut vectors = Vec::with_capacity(len);
        let mut document_ids = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            chunk_seqs.push(record.chunk_seq);
            vectors.push(record.vector.clone());
            document_ids.push(record.metadata.document_id);
            contents.push(record.metadata.content.as_str());
            pages.push(record.metadata.page);
            sources.push(record.metadata.source.as_str());
            created_ats.push(record.metadata.created_at.as_str());
        }

        let schema = self.create_schema(vector_dim);

        // Create vector array using FixedSizeListArray
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        for vector in &vectors {
            flat_values.extend_from_slice(vector);
        }
        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| {
                    TutorError::Database(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(Int64Array::from(chunk_seqs)),
            Arc::new(vector_array),
            Arc::new(Int64Array::from(document_ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(Int64Array::from(pages)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| TutorError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Search for the chunks most similar to a query vector
    ///
    /// Distances are cosine, so over unit vectors `1.0 - distance` recovers
    /// the inner-product similarity. Results come back ordered by ascending
    /// distance.
    ///
    /// # Arguments
    /// * `query_vector` - The query vector to search for
    /// * `limit` - Maximum number of results to return
    /// * `document_filter` - Optional document ID to restrict results to
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        document_filter: Option<i64>,
    ) -> Result<Vec<SearchResult>, TutorError> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        let mut query = table
            .vector_search(query_vector)
            .map_err(|e| TutorError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        // Apply document filter if provided
        if let Some(document_id) = document_filter {
            query = query.only_if(format!("document_id = {}", document_id));
        }

        let results = query
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to execute search: {}", e)))?;

        self.parse_search_results_stream(results).await
    }

    /// Parse search results from LanceDB stream into SearchResult structs
    async fn parse_search_results_stream(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchResult>, TutorError> {
        let mut search_results = Vec::new();

        while let Some(batch_result) = results
            .try_next()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to read result stream: {}", e)))?
        {
            let parsed_batch = self.parse_search_batch(&batch_result)?;
            search_results.extend(parsed_batch);
        }

        debug!("Parsed {} search results from stream", search_results.len());
        Ok(search_results)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(&self, batch: &RecordBatch) -> Result<Vec<SearchResult>, TutorError> {
        let mut search_results = Vec::new();
        let num_rows = batch.num_rows();

        let chunk_seqs = Self::int64_column(batch, "chunk_seq")?;
        let document_ids = Self::int64_column(batch, "document_id")?;
        let contents = Self::string_column(batch, "content")?;
        let pages = Self::int64_column(batch, "page")?;
        let sources = Self::string_column(batch, "source")?;
        let created_ats = Self::string_column(batch, "created_at")?;

        // Extract distance scores if available
        let distances = batch
            .column_by_name("_distance")
            .map(|col| col.as_any().downcast_ref::<Float32Array>());

        for row in 0..num_rows {
            let metadata = ChunkMetadata {
                document_id: document_ids.value(row),
                content: contents.value(row).to_string(),
                page: pages.value(row),
                source: sources.value(row).to_string(),
                created_at: created_ats.value(row).to_string(),
            };

            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Convert cosine distance to similarity score (higher is better)
            let similarity_score = 1.0 - distance;

            search_results.push(SearchResult {
                chunk_seq: chunk_seqs.value(row),
                metadata,
                similarity_score,
                distance,
            });
        }

        debug!("Parsed {} search results", search_results.len());
        Ok(search_results)
    }

    fn int64_column<'a>(
        batch: &'a RecordBatch,
        name: &str,
    ) -> Result<&'a Int64Array, TutorError> {
        batch
            .column_by_name(name)
            .ok_or_else(|| TutorError::Database(format!("Missing {} column", name)))?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| TutorError::Database(format!("Invalid {} column type", name)))
    }

    fn string_column<'a>(
        batch: &'a RecordBatch,
        name: &str,
    ) -> Result<&'a StringArray, TutorError> {
        batch
            .column_by_name(name)
            .ok_or_else(|| TutorError::Database(format!("Missing {} column", name)))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| TutorError::Database(format!("Invalid {} column type", name)))
    }

    /// Delete all embeddings belonging to a document
    ///
    /// # Arguments
    /// * `document_id` - ID of the document whose embeddings are removed
    #[inline]
    pub async fn delete_document_embeddings(&mut self, document_id: i64) -> Result<(), TutorError> {
        debug!("Deleting embeddings for document: {}", document_id);

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        let predicate = format!("document_id = {}", document_id);
        table.delete(&predicate).await.map_err(|e| {
            TutorError::Database(format!("Failed to delete document embeddings: {}", e))
        })?;

        info!("Deleted embeddings for document: {}", document_id);
        Ok(())
    }

    /// Delete the rows holding the given chunk sequence numbers
    ///
    /// Used by the consistency checker to drop vector rows whose SQLite
    /// chunk no longer exists.
    #[inline]
    pub async fn delete_chunk_seqs(&mut self, chunk_seqs: &[i64]) -> Result<(), TutorError> {
        if chunk_seqs.is_empty() {
            return Ok(());
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        let seq_list = chunk_seqs
            .iter()
            .map(|seq| seq.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = format!("chunk_seq IN ({})", seq_list);
        table
            .delete(&predicate)
            .await
            .map_err(|e| TutorError::Database(format!("Failed to delete chunk rows: {}", e)))?;

        debug!("Deleted {} vector rows by chunk_seq", chunk_seqs.len());
        Ok(())
    }

    /// Get the total number of embeddings stored
    #[inline]
    pub async fn count_embeddings(&self) -> Result<u64, TutorError> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| TutorError::Database(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }

    /// List every chunk_seq currently stored, sorted ascending
    ///
    /// Used by the consistency checker to compare the vector table against
    /// the SQLite chunk table.
    #[inline]
    pub async fn all_chunk_seqs(&self) -> Result<Vec<i64>, TutorError> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        let mut results = table
            .query()
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to scan table: {}", e)))?;

        let mut seqs = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to read scan stream: {}", e)))?
        {
            let column = Self::int64_column(&batch, "chunk_seq")?;
            for row in 0..batch.num_rows() {
                seqs.push(column.value(row));
            }
        }

        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Drop every stored embedding and recreate the empty table
    ///
    /// Reindex runs this before rebuilding the vector table from scratch so
    /// stale rows can never survive into the new sequence numbering.
    #[inline]
    pub async fn reset(&mut self) -> Result<(), TutorError> {
        info!("Resetting vector table");

        if let Err(e) = self.drop_table_if_exists().await {
            warn!("Failed to drop table during reset: {}", e);
        }

        self.initialize_table().await.map_err(|e| {
            TutorError::Database(format!("Failed to recreate table during reset: {}", e))
        })?;

        info!("Vector table reset completed");
        Ok(())
    }

    /// Optimize the vector database by compacting and reorganizing data
    #[inline]
    pub async fn optimize(&mut self) -> Result<(), TutorError> {
        debug!("Optimizing vector database");

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| TutorError::Database(format!("Failed to open table: {}", e)))?;

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| TutorError::Database(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Attempt to recover from database corruption
    fn attempt_corruption_recovery(db_path: &PathBuf) -> Result<(), TutorError> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        // Create backup of corrupted database if it exists
        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        // Remove any remaining corrupt files
        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                TutorError::Database(format!("Failed to remove corrupted database: {}", e))
            })?;
        }

        info!("Database corruption recovery completed");
        Ok(())
    }

    /// Initialize table with corruption recovery support
    async fn initialize_table_with_recovery(&mut self) -> Result<(), TutorError> {
        match self.initialize_table().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("schema")
                {
                    warn!("Table corruption detected during initialization: {}", e);

                    // Try to drop and recreate the table
                    if let Err(drop_err) = self.drop_table_if_exists().await {
                        warn!("Failed to drop corrupted table: {}", drop_err);
                    }

                    // Retry table creation
                    self.initialize_table().await.map_err(|e| {
                        TutorError::Database(format!(
                            "Failed to recreate table after corruption: {}",
                            e
                        ))
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Drop the embeddings table if it exists
    async fn drop_table_if_exists(&self) -> Result<(), TutorError> {
        let table_names =
            self.connection.table_names().execute().await.map_err(|e| {
                TutorError::Database(format!("Failed to list tables for drop: {}", e))
            })?;

        if table_names.contains(&self.table_name) {
            info!("Dropping existing embeddings table");
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| TutorError::Database(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }

    /// Validate database integrity
    ///
    /// # Returns
    /// * `Result<bool, TutorError>` - True if database is healthy, false if corrupted
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool, TutorError> {
        debug!("Validating database integrity");

        // Check if we can list tables
        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return Ok(false);
            }
        };

        // Check if our table exists
        if !table_names.contains(&self.table_name) {
            warn!("Embeddings table missing during integrity check");
            return Ok(false);
        }

        // Try to open the table and get a count
        match self.connection.open_table(&self.table_name).execute().await {
            Ok(table) => match table.count_rows(None).await {
                Ok(count) => {
                    debug!("Database integrity check passed, {} rows found", count);
                    Ok(true)
                }
                Err(e) => {
                    error!("Failed to count rows during integrity check: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                error!("Failed to open table during integrity check: {}", e);
                Ok(false)
            }
        }
    }
}
