#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

const DOCUMENT_COLUMNS: &str = "id, name, subject, source_path, status, total_chunks, \
     error_message, created_date, indexed_date";

const CHUNK_COLUMNS: &str = "id, chunk_seq, document_id, content, page, source, created_date";

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO documents (name, subject, source_path, status, created_date) \
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(&new_document.name)
        .bind(new_document.subject)
        .bind(&new_document.source_path)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE name = ?");
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(name)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by name")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_date DESC");
        let documents = sqlx::query_as::<_, Document>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list all documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn list_completed(pool: &SqlitePool) -> Result<Vec<Document>> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE status = 'completed' ORDER BY indexed_date DESC"
        );
        let documents = sqlx::query_as::<_, Document>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list completed documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: DocumentUpdate,
    ) -> Result<Option<Document>> {
        let mut query_parts = Vec::new();
        let mut query_values = Vec::new();

        if let Some(status) = update.status {
            query_parts.push("status = ?");
            let status_str = match status {
                DocumentStatus::Pending => "pending",
                DocumentStatus::Indexing => "indexing",
                DocumentStatus::Completed => "completed",
                DocumentStatus::Failed => "failed",
            };
            query_values.push(status_str.to_string());
        }

        if let Some(total_chunks) = update.total_chunks {
            query_parts.push("total_chunks = ?");
            query_values.push(total_chunks.to_string());
        }

        if let Some(error) = update.error_message {
            query_parts.push("error_message = ?");
            query_values.push(error);
        }

        if let Some(indexed_date) = update.indexed_date {
            query_parts.push("indexed_date = ?");
            query_values.push(indexed_date.to_string());
        }

        if query_parts.is_empty() {
            return Self::get_by_id(pool, id).await;
        }

        let query_str = format!(
            "UPDATE documents SET {} WHERE id = ?",
            query_parts.join(", ")
        );

        let mut query = sqlx::query(&query_str);
        for value in query_values {
            query = query.bind(value);
        }
        query = query.bind(id);

        query
            .execute(pool)
            .await
            .context("Failed to update document")?;

        Self::get_by_id(pool, id).await
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn get_statistics(
        pool: &SqlitePool,
        document_id: i64,
    ) -> Result<Option<DocumentStatistics>> {
        let Some(document) = Self::get_by_id(pool, document_id).await? else {
            return Ok(None);
        };

        let chunk_count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(pool)
                .await
                .context("Failed to get chunk count")?;

        let page_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT page) FROM chunks WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_one(pool)
        .await
        .context("Failed to get page count")?;

        Ok(Some(DocumentStatistics {
            document,
            total_chunks: chunk_count,
            total_pages: page_count,
        }))
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Next free position in the global chunk sequence.
    #[inline]
    pub async fn next_chunk_seq(pool: &SqlitePool) -> Result<i64> {
        let next =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(chunk_seq) + 1, 0) FROM chunks")
                .fetch_one(pool)
                .await
                .context("Failed to get next chunk sequence number")?;

        Ok(next)
    }

    #[inline]
    pub async fn create_batch(pool: &SqlitePool, chunks: Vec<NewChunk>) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for batch chunk insert")?;

        let mut created_chunks = Vec::new();
        let now = Utc::now().naive_utc();

        for chunk in chunks {
            let id = sqlx::query(
                "INSERT INTO chunks (chunk_seq, document_id, content, page, source, created_date) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.chunk_seq)
            .bind(chunk.document_id)
            .bind(&chunk.content)
            .bind(chunk.page)
            .bind(&chunk.source)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .context("Failed to create chunk in batch")?
            .last_insert_rowid();

            created_chunks.push(Chunk {
                id,
                chunk_seq: chunk.chunk_seq,
                document_id: chunk.document_id,
                content: chunk.content,
                page: chunk.page,
                source: chunk.source,
                created_date: now,
            });
        }

        transaction
            .commit()
            .await
            .context("Failed to commit batch chunk insert transaction")?;

        debug!("Created {} chunks", created_chunks.len());
        Ok(created_chunks)
    }

    #[inline]
    pub async fn get_by_seq(pool: &SqlitePool, chunk_seq: i64) -> Result<Option<Chunk>> {
        let query = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE chunk_seq = ?");
        let result = sqlx::query_as::<_, Chunk>(&query)
            .bind(chunk_seq)
            .fetch_optional(pool)
            .await
            .context("Failed to get chunk by sequence number")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<Chunk>> {
        let query =
            format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ? ORDER BY chunk_seq");
        let chunks = sqlx::query_as::<_, Chunk>(&query)
            .bind(document_id)
            .fetch_all(pool)
            .await
            .context("Failed to list chunks by document")?;

        Ok(chunks)
    }

    /// Every occupied position in the chunk sequence, ascending.
    #[inline]
    pub async fn all_seqs(pool: &SqlitePool) -> Result<Vec<i64>> {
        let seqs = sqlx::query_scalar::<_, i64>("SELECT chunk_seq FROM chunks ORDER BY chunk_seq")
            .fetch_all(pool)
            .await
            .context("Failed to list chunk sequence numbers")?;

        Ok(seqs)
    }

    #[inline]
    pub async fn count_all(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;

        Ok(count)
    }

    #[inline]
    pub async fn count_by_document(pool: &SqlitePool, document_id: i64) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(pool)
                .await
                .context("Failed to count chunks by document")?;

        Ok(count)
    }

    #[inline]
    pub async fn seqs_for_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<i64>> {
        let seqs = sqlx::query_scalar::<_, i64>(
            "SELECT chunk_seq FROM chunks WHERE document_id = ? ORDER BY chunk_seq",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunk sequence numbers for document")?;

        Ok(seqs)
    }

    #[inline]
    pub async fn delete_by_document(pool: &SqlitePool, document_id: i64) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(pool)
            .await
            .context("Failed to delete chunks by document")?;

        Ok(result.rows_affected() as usize)
    }

    #[inline]
    pub async fn delete_all(pool: &SqlitePool) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks")
            .execute(pool)
            .await
            .context("Failed to delete all chunks")?;

        Ok(result.rows_affected() as usize)
    }
}

pub struct ConversationQueries;

impl ConversationQueries {
    #[inline]
    pub async fn append(
        pool: &SqlitePool,
        new_turn: NewConversationTurn,
    ) -> Result<ConversationTurn> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO conversations (student_id, question, answer, created_date) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&new_turn.student_id)
        .bind(&new_turn.question)
        .bind(&new_turn.answer)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to append conversation turn")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created conversation turn"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ConversationTurn>> {
        let result = sqlx::query_as::<_, ConversationTurn>(
            "SELECT id, student_id, question, answer, created_date \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get conversation turn by id")?;

        Ok(result)
    }

    /// The most recent `limit` turns for a student, oldest first.
    #[inline]
    pub async fn recent_for_student(
        pool: &SqlitePool,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut turns = sqlx::query_as::<_, ConversationTurn>(
            "SELECT id, student_id, question, answer, created_date \
             FROM conversations WHERE student_id = ? \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(student_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .context("Failed to get recent conversation turns")?;

        turns.reverse();
        Ok(turns)
    }

    #[inline]
    pub async fn clear_for_student(pool: &SqlitePool, student_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM conversations WHERE student_id = ?")
            .bind(student_id)
            .execute(pool)
            .await
            .context("Failed to clear conversation history")?;

        Ok(result.rows_affected() as usize)
    }
}
