use super::*;
use crate::database::sqlite::models::{DocumentStatus, Subject};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' \
         AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["documents", "chunks", "conversations"].into_iter().collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_foreign_key_constraints() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let document = database
        .create_document(NewDocument {
            name: "physics-vol1".to_string(),
            subject: Subject::Physics,
            source_path: "/data/physics.txt".to_string(),
        })
        .await?;

    database
        .insert_chunk_batch(vec![NewChunk {
            chunk_seq: 0,
            document_id: document.id,
            content: "This is a test chunk.".to_string(),
            page: 1,
            source: "physics-vol1".to_string(),
        }])
        .await?;

    database.delete_document(document.id).await?;

    let chunk_after_delete = database.get_chunk_by_seq(0).await?;
    assert!(chunk_after_delete.is_none());
    assert_eq!(database.chunk_count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn integration_document_workflow() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let document = database
        .create_document(NewDocument {
            name: "calculus".to_string(),
            subject: Subject::Math,
            source_path: "/data/calculus.txt".to_string(),
        })
        .await?;
    assert_eq!(document.status, DocumentStatus::Pending);
    assert_eq!(document.total_chunks, 0);

    database
        .update_document(
            document.id,
            &DocumentUpdate {
                status: Some(DocumentStatus::Indexing),
                ..Default::default()
            },
        )
        .await?;

    let start_seq = database.next_chunk_seq().await?;
    let chunks: Vec<NewChunk> = (0..3)
        .map(|i| NewChunk {
            chunk_seq: start_seq + i,
            document_id: document.id,
            content: format!("Content for page {}", i + 1),
            page: i + 1,
            source: "calculus".to_string(),
        })
        .collect();

    let created = database.insert_chunk_batch(chunks).await?;
    assert_eq!(created.len(), 3);

    let final_document = database
        .update_document(
            document.id,
            &DocumentUpdate {
                status: Some(DocumentStatus::Completed),
                total_chunks: Some(3),
                indexed_date: Some(Utc::now().naive_utc()),
                ..Default::default()
            },
        )
        .await?
        .expect("should update document successfully");
    assert_eq!(final_document.status, DocumentStatus::Completed);
    assert_eq!(final_document.total_chunks, 3);

    let statistics = database
        .get_document_statistics(document.id)
        .await?
        .expect("should get statistics successfully");
    assert_eq!(statistics.total_chunks, 3);
    assert_eq!(statistics.total_pages, 3);

    let completed = database.list_completed_documents().await?;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, document.id);

    Ok(())
}

#[tokio::test]
async fn integration_error_handling() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let missing_document = database.get_document_by_id(999).await?;
    assert!(missing_document.is_none());

    let missing_chunk = database.get_chunk_by_seq(999).await?;
    assert!(missing_chunk.is_none());

    let document = database
        .create_document(NewDocument {
            name: "broken".to_string(),
            subject: Subject::General,
            source_path: "/data/broken.txt".to_string(),
        })
        .await?;

    let failed_document = database
        .update_document(
            document.id,
            &DocumentUpdate {
                status: Some(DocumentStatus::Failed),
                error_message: Some("Test error message".to_string()),
                ..Default::default()
            },
        )
        .await?
        .expect("should update document successfully");
    assert_eq!(failed_document.status, DocumentStatus::Failed);
    assert_eq!(
        failed_document.error_message,
        Some("Test error message".to_string())
    );

    Ok(())
}

#[tokio::test]
async fn integration_transaction_rollback() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let document = database
        .create_document(NewDocument {
            name: "rollback".to_string(),
            subject: Subject::General,
            source_path: "/data/rollback.txt".to_string(),
        })
        .await?;

    let mut transaction = database.pool().begin().await?;

    sqlx::query(
        "INSERT INTO chunks (chunk_seq, document_id, content, page, source, created_date) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(0_i64)
    .bind(document.id)
    .bind("rolled back content")
    .bind(1_i64)
    .bind("rollback")
    .bind(Utc::now().naive_utc())
    .execute(&mut *transaction)
    .await?;

    transaction.rollback().await?;

    let chunk_after_rollback = database.get_chunk_by_seq(0).await?;
    assert!(chunk_after_rollback.is_none());

    Ok(())
}

#[tokio::test]
async fn integration_concurrent_access() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let mut handles = Vec::new();

    for i in 0..10 {
        let pool = database.pool().clone();

        let handle = tokio::spawn(async move {
            queries::ConversationQueries::append(
                &pool,
                NewConversationTurn {
                    student_id: "alex".to_string(),
                    question: format!("concurrent question {i}"),
                    answer: format!("concurrent answer {i}"),
                },
            )
            .await
        });

        handles.push(handle);
    }

    let mut successful_inserts = 0;
    for handle in handles {
        if handle
            .await
            .expect("handle should join successfully")
            .is_ok()
        {
            successful_inserts += 1;
        }
    }

    assert_eq!(successful_inserts, 10);

    let turns = database.recent_conversation_turns("alex", 20).await?;
    assert_eq!(turns.len(), 10);

    Ok(())
}
