use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    Chunk, ConversationTurn, Document, DocumentStatistics, DocumentUpdate, NewChunk,
    NewConversationTurn, NewDocument,
};
use crate::database::sqlite::queries::{ChunkQueries, ConversationQueries, DocumentQueries};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");
        let db_url = db_path.to_string_lossy();

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_url.as_ref()).await
    }

    // Document operations
    pub async fn create_document(&self, new_document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, new_document).await
    }

    pub async fn get_document_by_id(&self, id: i64) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    pub async fn get_document_by_name(&self, name: &str) -> Result<Option<Document>> {
        DocumentQueries::get_by_name(&self.pool, name).await
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_all(&self.pool).await
    }

    pub async fn list_completed_documents(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_completed(&self.pool).await
    }

    pub async fn update_document(&self, id: i64, update: &DocumentUpdate) -> Result<Option<Document>> {
        DocumentQueries::update(&self.pool, id, update.clone()).await
    }

    pub async fn delete_document(&self, id: i64) -> Result<bool> {
        DocumentQueries::delete(&self.pool, id).await
    }

    pub async fn get_document_statistics(&self, id: i64) -> Result<Option<DocumentStatistics>> {
        DocumentQueries::get_statistics(&self.pool, id).await
    }

    // Chunk operations
    pub async fn next_chunk_seq(&self) -> Result<i64> {
        ChunkQueries::next_chunk_seq(&self.pool).await
    }

    pub async fn insert_chunk_batch(&self, chunks: Vec<NewChunk>) -> Result<Vec<Chunk>> {
        ChunkQueries::create_batch(&self.pool, chunks).await
    }

    pub async fn get_chunk_by_seq(&self, chunk_seq: i64) -> Result<Option<Chunk>> {
        ChunkQueries::get_by_seq(&self.pool, chunk_seq).await
    }

    pub async fn get_chunks_for_document(&self, document_id: i64) -> Result<Vec<Chunk>> {
        ChunkQueries::list_by_document(&self.pool, document_id).await
    }

    pub async fn all_chunk_seqs(&self) -> Result<Vec<i64>> {
        ChunkQueries::all_seqs(&self.pool).await
    }

    pub async fn chunk_seqs_for_document(&self, document_id: i64) -> Result<Vec<i64>> {
        ChunkQueries::seqs_for_document(&self.pool, document_id).await
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        ChunkQueries::count_all(&self.pool).await
    }

    pub async fn chunk_count_for_document(&self, document_id: i64) -> Result<i64> {
        ChunkQueries::count_by_document(&self.pool, document_id).await
    }

    pub async fn delete_chunks_for_document(&self, document_id: i64) -> Result<usize> {
        ChunkQueries::delete_by_document(&self.pool, document_id).await
    }

    pub async fn delete_all_chunks(&self) -> Result<usize> {
        ChunkQueries::delete_all(&self.pool).await
    }

    // Conversation history operations
    pub async fn append_conversation_turn(
        &self,
        new_turn: NewConversationTurn,
    ) -> Result<ConversationTurn> {
        ConversationQueries::append(&self.pool, new_turn).await
    }

    pub async fn recent_conversation_turns(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        ConversationQueries::recent_for_student(&self.pool, student_id, limit).await
    }

    pub async fn clear_conversation(&self, student_id: &str) -> Result<usize> {
        ConversationQueries::clear_for_student(&self.pool, student_id).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        // Run VACUUM to reclaim space and defragment
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        // Run ANALYZE to update table statistics for better query planning
        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
