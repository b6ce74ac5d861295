use super::*;
use crate::config::OllamaConfig;
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers /api/embed with one deterministic unit vector per input text.
struct EmbedResponder {
    dimension: usize,
}

impl Respond for EmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("embed request should be JSON");
        let count = body["input"]
            .as_array()
            .map_or(0, |inputs| inputs.len());

        let embeddings: Vec<Vec<f32>> = (0..count)
            .map(|i| {
                let mut vector = vec![0.0; self.dimension];
                vector[i % self.dimension] = 1.0;
                vector
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

async fn start_embed_server(dimension: usize) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder { dimension })
        .mount(&server)
        .await;
    server
}

async fn create_test_ingestor(server: &MockServer) -> (Ingestor, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let url = Url::parse(&server.uri()).expect("mock server uri should parse");

    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ollama: OllamaConfig {
            host: url.host_str().expect("mock server should have a host").to_string(),
            port: url.port().expect("mock server should have a port"),
            embedding_dimension: 4,
            ..OllamaConfig::default()
        },
        ..Config::default()
    };

    let ingestor = Ingestor::new(config).await.expect("should create ingestor");
    (ingestor, temp_dir)
}

fn write_source_file(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).expect("should write source file");
    path
}

/// Two paragraphs of distinct words, each long enough to stand alone
/// as its own chunk under the default chunking bounds.
fn two_paragraph_text() -> String {
    let first: Vec<String> = (0..150).map(|i| format!("alpha{i}")).collect();
    let second: Vec<String> = (0..150).map(|i| format!("beta{i}")).collect();
    format!("{}\n\n{}", first.join(" "), second.join(" "))
}

#[tokio::test(flavor = "multi_thread")]
async fn add_document_stores_chunks_and_embeddings() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let source = write_source_file(&temp_dir, "algebra.txt", &two_paragraph_text());

    let document = ingestor
        .add_document(&source, None, Subject::Math)
        .await
        .expect("ingestion should succeed");

    assert_eq!(document.name, "algebra");
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(document.total_chunks, 2);
    assert!(document.indexed_date.is_some());

    let chunks = ingestor
        .database()
        .get_chunks_for_document(document.id)
        .await
        .expect("should list chunks");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chunk_seq, 0);
    assert_eq!(chunks[1].chunk_seq, 1);
    assert!(chunks[0].content.starts_with("alpha0"));
    assert!(chunks[1].content.starts_with("beta0"));
    assert_eq!(chunks[0].source, "algebra");

    let report = ingestor
        .validate_consistency()
        .await
        .expect("consistency check should succeed");
    assert!(report.is_consistent, "{}", report.summary());
    assert_eq!(report.lancedb_embeddings, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_document_tags_pages_from_markers() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;

    let first: Vec<String> = (0..130).map(|i| format!("intro{i}")).collect();
    let second: Vec<String> = (0..130).map(|i| format!("detail{i}")).collect();
    let text = format!("[PAGE 12] {}\n\n[PAGE 13] {}", first.join(" "), second.join(" "));
    let source = write_source_file(&temp_dir, "paged.txt", &text);

    let document = ingestor
        .add_document(&source, Some("paged-notes".to_string()), Subject::Physics)
        .await
        .expect("ingestion should succeed");

    assert_eq!(document.name, "paged-notes");
    let chunks = ingestor
        .database()
        .get_chunks_for_document(document.id)
        .await
        .expect("should list chunks");
    let pages: Vec<i64> = chunks.iter().map(|chunk| chunk.page).collect();
    assert_eq!(pages, vec![12, 13]);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_document_rejects_duplicate_names() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let source = write_source_file(&temp_dir, "notes.txt", &two_paragraph_text());

    ingestor
        .add_document(&source, None, Subject::General)
        .await
        .expect("first ingestion should succeed");

    let result = ingestor.add_document(&source, None, Subject::General).await;
    assert!(result.is_err());
    let message = format!("{:#}", result.expect_err("duplicate should fail"));
    assert!(message.contains("already exists"), "{}", message);

    let documents = ingestor
        .database()
        .list_documents()
        .await
        .expect("should list documents");
    assert_eq!(documents.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_document_marks_failed_when_embedding_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let source = write_source_file(&temp_dir, "broken.txt", &two_paragraph_text());

    let result = ingestor.add_document(&source, None, Subject::Math).await;
    assert!(result.is_err());

    let document = ingestor
        .database()
        .get_document_by_name("broken")
        .await
        .expect("lookup should succeed")
        .expect("document row should exist");
    assert_eq!(document.status, DocumentStatus::Failed);
    let error_message = document.error_message.expect("failure should be recorded");
    assert!(error_message.contains("embeddings"), "{}", error_message);

    // Nothing was stored in either half.
    let chunk_count = ingestor
        .database()
        .chunk_count()
        .await
        .expect("should count chunks");
    assert_eq!(chunk_count, 0);
    let report = ingestor
        .validate_consistency()
        .await
        .expect("consistency check should succeed");
    assert_eq!(report.lancedb_embeddings, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_document_removes_both_stores() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let source = write_source_file(&temp_dir, "geometry.txt", &two_paragraph_text());

    ingestor
        .add_document(&source, None, Subject::Math)
        .await
        .expect("ingestion should succeed");

    let deleted = ingestor
        .delete_document("geometry")
        .await
        .expect("deletion should succeed");
    assert_eq!(deleted.name, "geometry");

    let documents = ingestor
        .database()
        .list_documents()
        .await
        .expect("should list documents");
    assert!(documents.is_empty());

    let report = ingestor
        .validate_consistency()
        .await
        .expect("consistency check should succeed");
    assert!(report.is_consistent);
    assert_eq!(report.sqlite_chunks, 0);
    assert_eq!(report.lancedb_embeddings, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_document_accepts_numeric_id() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let source = write_source_file(&temp_dir, "trig.txt", &two_paragraph_text());

    let document = ingestor
        .add_document(&source, None, Subject::Math)
        .await
        .expect("ingestion should succeed");

    ingestor
        .delete_document(&document.id.to_string())
        .await
        .expect("deletion by id should succeed");

    assert!(
        ingestor
            .database()
            .get_document_by_id(document.id)
            .await
            .expect("lookup should succeed")
            .is_none()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_unknown_document_fails() {
    let server = start_embed_server(4).await;
    let (mut ingestor, _temp_dir) = create_test_ingestor(&server).await;

    let result = ingestor.delete_document("no-such-document").await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn reindex_rebuilds_from_source_files() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let first = write_source_file(&temp_dir, "volume-one.txt", &two_paragraph_text());
    let second = write_source_file(&temp_dir, "volume-two.txt", &two_paragraph_text());

    ingestor
        .add_document(&first, None, Subject::Chemistry)
        .await
        .expect("ingestion should succeed");
    ingestor
        .add_document(&second, None, Subject::Chemistry)
        .await
        .expect("ingestion should succeed");

    let stats = ingestor.reindex_all().await.expect("reindex should succeed");
    assert_eq!(stats.documents_processed, 2);
    assert_eq!(stats.chunks_created, 4);
    assert_eq!(stats.embeddings_generated, 4);
    assert_eq!(stats.errors_encountered, 0);

    // Sequence numbers are reallocated densely from zero.
    let seqs = ingestor
        .database()
        .all_chunk_seqs()
        .await
        .expect("should list chunk seqs");
    assert_eq!(seqs, vec![0, 1, 2, 3]);

    let report = ingestor
        .validate_consistency()
        .await
        .expect("consistency check should succeed");
    assert!(report.is_consistent, "{}", report.summary());
}

#[tokio::test(flavor = "multi_thread")]
async fn reindex_skips_documents_with_missing_sources() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let kept = write_source_file(&temp_dir, "kept.txt", &two_paragraph_text());
    let removed = write_source_file(&temp_dir, "removed.txt", &two_paragraph_text());

    ingestor
        .add_document(&kept, None, Subject::Biology)
        .await
        .expect("ingestion should succeed");
    ingestor
        .add_document(&removed, None, Subject::Biology)
        .await
        .expect("ingestion should succeed");

    std::fs::remove_file(&removed).expect("should remove source file");

    let stats = ingestor.reindex_all().await.expect("reindex should succeed");
    assert_eq!(stats.documents_processed, 1);
    assert_eq!(stats.chunks_created, 2);
    assert_eq!(stats.errors_encountered, 1);

    let failed = ingestor
        .database()
        .get_document_by_name("removed")
        .await
        .expect("lookup should succeed")
        .expect("document row should exist");
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert!(failed.error_message.is_some());

    let kept_doc = ingestor
        .database()
        .get_document_by_name("kept")
        .await
        .expect("lookup should succeed")
        .expect("document row should exist");
    assert_eq!(kept_doc.status, DocumentStatus::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_document_rejects_empty_files() {
    let server = start_embed_server(4).await;
    let (mut ingestor, temp_dir) = create_test_ingestor(&server).await;
    let source = write_source_file(&temp_dir, "empty.txt", "   \n\n  ");

    let result = ingestor.add_document(&source, None, Subject::General).await;
    assert!(result.is_err());

    // No document row is created for an unreadable submission.
    let documents = ingestor
        .database()
        .list_documents()
        .await
        .expect("should list documents");
    assert!(documents.is_empty());
}

#[test]
fn ingest_stats_default_is_zeroed() {
    let stats = IngestStats::default();
    assert_eq!(stats.documents_processed, 0);
    assert_eq!(stats.chunks_created, 0);
    assert_eq!(stats.embeddings_generated, 0);
    assert_eq!(stats.errors_encountered, 0);
}
