// Ingest module
// Turns study material text files into chunk rows and embeddings. Chunks
// are appended to SQLite first and to LanceDB second, sharing one global
// chunk_seq, so the vector table never references text that does not exist.

pub mod chunking;
pub mod consistency;

use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::lancedb::{ChunkMetadata, VectorRecord, VectorStore};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    Document, DocumentStatus, DocumentUpdate, NewChunk, NewDocument, Subject,
};
use crate::models::OllamaClient;

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, clean_math_text};
pub use consistency::{
    CleanupStats, ConsistencyChecker, ConsistencyReport, DocumentConsistencyIssue,
};

/// Statistics about an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub errors_encountered: usize,
}

/// Processes study material into searchable chunks and embeddings
pub struct Ingestor {
    config: Config,
    database: Database,
    vector_store: VectorStore,
    ollama_client: OllamaClient,
}

impl Ingestor {
    /// Create a new ingestor with its storage and model connections
    #[inline]
    pub async fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.get_base_dir()).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.get_base_dir().display()
            )
        })?;

        let database = Database::new(config.database_path())
            .await
            .context("Failed to initialize SQLite database")?;

        let vector_store = VectorStore::new(&config)
            .await
            .context("Failed to initialize LanceDB vector store")?;

        let ollama_client =
            OllamaClient::new(&config).context("Failed to initialize Ollama client")?;

        Ok(Self {
            config,
            database,
            vector_store,
            ollama_client,
        })
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Ingest a single text file as a new document
    ///
    /// Chunks the text, embeds every chunk, and stores both halves. The
    /// document row tracks progress: `pending` on creation, `indexing`
    /// while embedding, then `completed` or `failed`.
    ///
    /// # Arguments
    /// * `source_path` - Path to a UTF-8 text file
    /// * `name` - Display name; defaults to the file stem
    /// * `subject` - Subject tag; math material gets extra text cleanup
    pub async fn add_document(
        &mut self,
        source_path: &Path,
        name: Option<String>,
        subject: Subject,
    ) -> Result<Document> {
        let text = fs::read_to_string(source_path)
            .await
            .with_context(|| format!("Failed to read source file: {}", source_path.display()))?;
        ensure!(
            !text.trim().is_empty(),
            "Source file contains no text: {}",
            source_path.display()
        );

        let name = match name {
            Some(name) => name,
            None => source_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
                .with_context(|| {
                    format!("Cannot derive a name from path: {}", source_path.display())
                })?,
        };

        if self.database.get_document_by_name(&name).await?.is_some() {
            bail!("A document named '{}' already exists", name);
        }

        let document = self
            .database
            .create_document(NewDocument {
                name: name.clone(),
                subject,
                source_path: source_path.to_string_lossy().into_owned(),
            })
            .await
            .context("Failed to create document record")?;

        info!("Ingesting document '{}' ({})", name, subject);

        match self.index_document(&document, &text).await {
            Ok(chunk_count) => {
                self.mark_completed(document.id, chunk_count as i64).await?;
                self.optimize_vector_store().await;
                info!("Completed ingesting '{}': {} chunks", name, chunk_count);

                self.database
                    .get_document_by_id(document.id)
                    .await?
                    .context("Document disappeared after ingestion")
            }
            Err(e) => {
                self.mark_failed(document.id, &e).await;
                Err(e.context(format!("Failed to ingest document '{}'", name)))
            }
        }
    }

    /// Delete a document with its chunks and embeddings
    ///
    /// Accepts a numeric document ID or a document name. Vector rows are
    /// removed before the SQLite rows so a partial failure can never leave
    /// embeddings pointing at deleted chunks.
    pub async fn delete_document(&mut self, identifier: &str) -> Result<Document> {
        let document = self.resolve_document(identifier).await?;

        self.vector_store
            .delete_document_embeddings(document.id)
            .await
            .with_context(|| format!("Failed to delete embeddings for '{}'", document.name))?;

        let deleted = self
            .database
            .delete_document(document.id)
            .await
            .with_context(|| format!("Failed to delete document '{}'", document.name))?;
        ensure!(deleted, "Document '{}' was already deleted", document.name);

        info!("Deleted document '{}'", document.name);
        Ok(document)
    }

    /// Rebuild every chunk and embedding from the original source files
    ///
    /// Clears both stores, then re-chunks and re-embeds each document in
    /// turn. Documents whose source file is unreadable are marked `failed`
    /// and skipped; the rest of the rebuild continues.
    pub async fn reindex_all(&mut self) -> Result<IngestStats> {
        let documents = self
            .database
            .list_documents()
            .await
            .context("Failed to list documents")?;

        info!("Reindexing {} documents from source", documents.len());

        self.vector_store
            .reset()
            .await
            .context("Failed to clear vector store")?;
        self.database
            .delete_all_chunks()
            .await
            .context("Failed to clear chunk table")?;

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(documents.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Reindexing {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut stats = IngestStats::default();
        for document in documents {
            bar.set_message(document.name.clone());

            let text = match fs::read_to_string(&document.source_path).await {
                Ok(text) => text,
                Err(e) => {
                    let err = anyhow::Error::from(e).context(format!(
                        "Failed to read source file: {}",
                        document.source_path
                    ));
                    warn!("Skipping '{}': {:#}", document.name, err);
                    self.mark_failed(document.id, &err).await;
                    stats.errors_encountered += 1;
                    bar.inc(1);
                    continue;
                }
            };

            match self.index_document(&document, &text).await {
                Ok(chunk_count) => {
                    self.mark_completed(document.id, chunk_count as i64).await?;
                    stats.documents_processed += 1;
                    stats.chunks_created += chunk_count;
                    stats.embeddings_generated += chunk_count;
                }
                Err(e) => {
                    warn!("Failed to reindex '{}': {:#}", document.name, e);
                    self.mark_failed(document.id, &e).await;
                    stats.errors_encountered += 1;
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        self.optimize_vector_store().await;
        info!(
            "Reindex complete: {} documents, {} chunks, {} errors",
            stats.documents_processed, stats.chunks_created, stats.errors_encountered
        );

        Ok(stats)
    }

    /// Compare the chunk table against the vector table
    #[inline]
    pub async fn validate_consistency(&mut self) -> Result<ConsistencyReport> {
        let checker = ConsistencyChecker::new(&self.database, &mut self.vector_store);
        checker.validate().await
    }

    /// Validate and remove orphaned vector rows in one pass
    pub async fn cleanup_inconsistencies(&mut self) -> Result<CleanupStats> {
        let mut checker = ConsistencyChecker::new(&self.database, &mut self.vector_store);
        let report = checker.validate().await?;
        if report.is_consistent {
            return Ok(CleanupStats {
                orphaned_removed: 0,
                missing_remaining: 0,
            });
        }
        checker.cleanup(&report).await
    }

    /// Chunk, embed, and store one document's text
    ///
    /// # Returns
    /// The number of chunks stored
    async fn index_document(&mut self, document: &Document, text: &str) -> Result<usize> {
        self.database
            .update_document(
                document.id,
                &DocumentUpdate {
                    status: Some(DocumentStatus::Indexing),
                    ..DocumentUpdate::default()
                },
            )
            .await
            .context("Failed to mark document as indexing")?;

        let chunks = chunk_text(text, &self.config.chunking, document.subject.is_math())
            .context("Failed to chunk document text")?;
        ensure!(!chunks.is_empty(), "Document produced no chunks");
        debug!("Chunked '{}' into {} chunks", document.name, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self
            .ollama_client
            .embed_passages(&texts)
            .context("Failed to generate embeddings")?;
        ensure!(
            embeddings.len() == chunks.len(),
            "Embedding count {} does not match chunk count {}",
            embeddings.len(),
            chunks.len()
        );

        let next_seq = self
            .database
            .next_chunk_seq()
            .await
            .context("Failed to allocate chunk sequence numbers")?;
        let created_at = Utc::now().to_rfc3339();

        let mut new_chunks = Vec::with_capacity(chunks.len());
        let mut records = Vec::with_capacity(chunks.len());
        for (offset, (chunk, vector)) in chunks.iter().zip(embeddings).enumerate() {
            let chunk_seq = next_seq + offset as i64;
            new_chunks.push(NewChunk {
                chunk_seq,
                document_id: document.id,
                content: chunk.text.clone(),
                page: chunk.page,
                source: document.name.clone(),
            });
            records.push(VectorRecord {
                chunk_seq,
                vector,
                metadata: ChunkMetadata {
                    document_id: document.id,
                    content: chunk.text.clone(),
                    page: chunk.page,
                    source: document.name.clone(),
                    created_at: created_at.clone(),
                },
            });
        }

        // SQLite first: the chunk table is the source of truth, and a
        // failure between the two writes leaves chunks without embeddings
        // rather than embeddings without chunks.
        self.database
            .insert_chunk_batch(new_chunks)
            .await
            .context("Failed to store chunks")?;
        self.vector_store
            .store_embeddings_batch(records)
            .await
            .context("Failed to store embeddings")?;

        Ok(chunks.len())
    }

    async fn resolve_document(&self, identifier: &str) -> Result<Document> {
        let document = match identifier.parse::<i64>() {
            Ok(id) => self.database.get_document_by_id(id).await?,
            Err(_) => self.database.get_document_by_name(identifier).await?,
        };
        document.with_context(|| format!("No document matches '{}'", identifier))
    }

    async fn mark_completed(&self, document_id: i64, total_chunks: i64) -> Result<()> {
        self.database
            .update_document(
                document_id,
                &DocumentUpdate {
                    status: Some(DocumentStatus::Completed),
                    total_chunks: Some(total_chunks),
                    error_message: None,
                    indexed_date: Some(Utc::now().naive_utc()),
                },
            )
            .await
            .context("Failed to mark document as completed")?;
        Ok(())
    }

    /// Record a failure on the document row; the original error stays
    /// authoritative, so a bookkeeping failure here is only logged.
    async fn mark_failed(&self, document_id: i64, error: &anyhow::Error) {
        let update = DocumentUpdate {
            status: Some(DocumentStatus::Failed),
            error_message: Some(format!("{:#}", error)),
            ..DocumentUpdate::default()
        };
        if let Err(e) = self.database.update_document(document_id, &update).await {
            warn!("Failed to record document failure: {:#}", e);
        }
    }

    /// Compact the vector table after a batch of writes. Failures are
    /// logged and ignored; the data is already durable.
    async fn optimize_vector_store(&mut self) {
        if let Err(e) = self.vector_store.optimize().await {
            warn!("Failed to optimize vector database: {}", e);
        }
    }
}

#[cfg(test)]
mod tests;
