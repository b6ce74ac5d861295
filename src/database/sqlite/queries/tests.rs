use super::*;
use crate::database::sqlite::Database;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let database = Database::new(&db_path)
        .await
        .expect("Failed to create test database");

    (temp_dir, database)
}

fn test_document() -> NewDocument {
    NewDocument {
        name: "physics-vol1".to_string(),
        subject: Subject::Physics,
        source_path: "/data/physics.txt".to_string(),
    }
}

#[tokio::test]
async fn document_crud_operations() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    let created_document = DocumentQueries::create(pool, test_document())
        .await
        .expect("Failed to create document");

    assert_eq!(created_document.name, "physics-vol1");
    assert_eq!(created_document.subject, Subject::Physics);
    assert_eq!(created_document.status, DocumentStatus::Pending);
    assert_eq!(created_document.total_chunks, 0);

    let retrieved_document = DocumentQueries::get_by_id(pool, created_document.id)
        .await
        .expect("Failed to get document")
        .expect("Document should exist");

    assert_eq!(retrieved_document.id, created_document.id);
    assert_eq!(retrieved_document.name, "physics-vol1");

    let by_name = DocumentQueries::get_by_name(pool, "physics-vol1")
        .await
        .expect("Failed to get document by name")
        .expect("Document should exist");

    assert_eq!(by_name.id, created_document.id);

    let update = DocumentUpdate {
        status: Some(DocumentStatus::Completed),
        total_chunks: Some(42),
        error_message: None,
        indexed_date: Some(Utc::now().naive_utc()),
    };

    let updated_document = DocumentQueries::update(pool, created_document.id, update)
        .await
        .expect("Failed to update document")
        .expect("Document should exist");

    assert_eq!(updated_document.status, DocumentStatus::Completed);
    assert_eq!(updated_document.total_chunks, 42);
    assert!(updated_document.indexed_date.is_some());

    let deleted = DocumentQueries::delete(pool, created_document.id)
        .await
        .expect("Failed to delete document");

    assert!(deleted);

    let not_found = DocumentQueries::get_by_id(pool, created_document.id)
        .await
        .expect("Query should succeed");

    assert!(not_found.is_none());
}

#[tokio::test]
async fn duplicate_document_names_rejected() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    DocumentQueries::create(pool, test_document())
        .await
        .expect("Failed to create document");

    assert!(DocumentQueries::create(pool, test_document()).await.is_err());
}

#[tokio::test]
async fn chunk_sequence_operations() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    let document = DocumentQueries::create(pool, test_document())
        .await
        .expect("Failed to create document");

    let start_seq = ChunkQueries::next_chunk_seq(pool)
        .await
        .expect("Failed to get next seq");
    assert_eq!(start_seq, 0);

    let new_chunks = (0..3)
        .map(|i| NewChunk {
            chunk_seq: start_seq + i,
            document_id: document.id,
            content: format!("chunk body {i}"),
            page: i + 1,
            source: "physics-vol1".to_string(),
        })
        .collect::<Vec<_>>();

    let created = ChunkQueries::create_batch(pool, new_chunks)
        .await
        .expect("Failed to create chunk batch");
    assert_eq!(created.len(), 3);

    let next_seq = ChunkQueries::next_chunk_seq(pool)
        .await
        .expect("Failed to get next seq");
    assert_eq!(next_seq, 3);

    let count = ChunkQueries::count_all(pool)
        .await
        .expect("Failed to count chunks");
    assert_eq!(count, 3);

    let seqs = ChunkQueries::all_seqs(pool)
        .await
        .expect("Failed to list seqs");
    assert_eq!(seqs, vec![0, 1, 2]);

    let middle = ChunkQueries::get_by_seq(pool, 1)
        .await
        .expect("Failed to get chunk by seq")
        .expect("Chunk should exist");
    assert_eq!(middle.content, "chunk body 1");
    assert_eq!(middle.page, 2);

    let listed = ChunkQueries::list_by_document(pool, document.id)
        .await
        .expect("Failed to list chunks");
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0].chunk_seq < w[1].chunk_seq));

    let deleted = ChunkQueries::delete_by_document(pool, document.id)
        .await
        .expect("Failed to delete chunks");
    assert_eq!(deleted, 3);
}

#[tokio::test]
async fn duplicate_chunk_seq_rejected() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    let document = DocumentQueries::create(pool, test_document())
        .await
        .expect("Failed to create document");

    let chunk = NewChunk {
        chunk_seq: 0,
        document_id: document.id,
        content: "first".to_string(),
        page: 1,
        source: "physics-vol1".to_string(),
    };

    ChunkQueries::create_batch(pool, vec![chunk.clone()])
        .await
        .expect("Failed to create chunk");

    // Same sequence position again must violate the UNIQUE constraint
    let result = ChunkQueries::create_batch(pool, vec![chunk]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn deleting_document_cascades_to_chunks() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    let document = DocumentQueries::create(pool, test_document())
        .await
        .expect("Failed to create document");

    ChunkQueries::create_batch(
        pool,
        vec![NewChunk {
            chunk_seq: 0,
            document_id: document.id,
            content: "orphan candidate".to_string(),
            page: 1,
            source: "physics-vol1".to_string(),
        }],
    )
    .await
    .expect("Failed to create chunk");

    DocumentQueries::delete(pool, document.id)
        .await
        .expect("Failed to delete document");

    let count = ChunkQueries::count_all(pool)
        .await
        .expect("Failed to count chunks");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn document_statistics() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    let document = DocumentQueries::create(pool, test_document())
        .await
        .expect("Failed to create document");

    let chunks = vec![
        NewChunk {
            chunk_seq: 0,
            document_id: document.id,
            content: "page one a".to_string(),
            page: 1,
            source: "physics-vol1".to_string(),
        },
        NewChunk {
            chunk_seq: 1,
            document_id: document.id,
            content: "page one b".to_string(),
            page: 1,
            source: "physics-vol1".to_string(),
        },
        NewChunk {
            chunk_seq: 2,
            document_id: document.id,
            content: "page two".to_string(),
            page: 2,
            source: "physics-vol1".to_string(),
        },
    ];

    ChunkQueries::create_batch(pool, chunks)
        .await
        .expect("Failed to create chunks");

    let stats = DocumentQueries::get_statistics(pool, document.id)
        .await
        .expect("Failed to get statistics")
        .expect("Statistics should exist");

    assert_eq!(stats.total_chunks, 3);
    assert_eq!(stats.total_pages, 2);
}

#[tokio::test]
async fn conversation_history_operations() {
    let (_temp_dir, database) = create_test_pool().await;
    let pool = database.pool();

    for i in 0..4 {
        ConversationQueries::append(
            pool,
            NewConversationTurn {
                student_id: "alex".to_string(),
                question: format!("question {i}"),
                answer: format!("answer {i}"),
            },
        )
        .await
        .expect("Failed to append turn");
    }

    ConversationQueries::append(
        pool,
        NewConversationTurn {
            student_id: "sam".to_string(),
            question: "other student".to_string(),
            answer: "other answer".to_string(),
        },
    )
    .await
    .expect("Failed to append turn");

    let recent = ConversationQueries::recent_for_student(pool, "alex", 2)
        .await
        .expect("Failed to get recent turns");

    // Windowed to the most recent turns, returned oldest first
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].question, "question 2");
    assert_eq!(recent[1].question, "question 3");

    let none_requested = ConversationQueries::recent_for_student(pool, "alex", 0)
        .await
        .expect("Failed to get recent turns");
    assert!(none_requested.is_empty());

    let cleared = ConversationQueries::clear_for_student(pool, "alex")
        .await
        .expect("Failed to clear history");
    assert_eq!(cleared, 4);

    let after_clear = ConversationQueries::recent_for_student(pool, "alex", 5)
        .await
        .expect("Failed to get recent turns");
    assert!(after_clear.is_empty());

    let other_student = ConversationQueries::recent_for_student(pool, "sam", 5)
        .await
        .expect("Failed to get recent turns");
    assert_eq!(other_student.len(), 1);
}
