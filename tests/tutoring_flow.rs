#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Tutoring Flow Integration Tests
//!
//! End-to-end coverage of the ask pipeline: course notes indexed through
//! the real chunking and storage path, questions answered through the MCP
//! tool handlers with every model endpoint mocked, and conversation
//! history fed back into subsequent prompts.
//!
//! The embedding mock maps texts onto axes by topic: anything mentioning
//! force lands on the first axis, everything else on the last. Questions
//! about force therefore match the indexed notes exactly, and off-topic
//! questions are orthogonal to the whole store.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tutor_mcp::config::{Config, OllamaConfig, RerankerConfig};
use tutor_mcp::database::lancedb::VectorStore;
use tutor_mcp::database::sqlite::Database;
use tutor_mcp::database::sqlite::models::Subject;
use tutor_mcp::generation::{ConversationHistory, HybridGenerator, REFUSAL_MESSAGE};
use tutor_mcp::ingest::Ingestor;
use tutor_mcp::mcp::tools::{AskTutorHandler, SearchMaterialHandler};
use tutor_mcp::mcp::{CallToolParams, CallToolResult, ToolContent, ToolHandler};
use tutor_mcp::models::{OllamaClient, RerankClient};
use tutor_mcp::retrieval::Retriever;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const DIMENSION: usize = 4;

const TUTOR_ANSWER: &str = "A net force accelerates the cart in proportion to its mass.";

/// Embeds each input onto a topic axis: texts mentioning force onto the
/// first, everything else onto the last
struct TopicEmbedder;

impl Respond for TopicEmbedder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("embed request should be JSON");
        let inputs = body["input"]
            .as_array()
            .expect("embed request should carry inputs");

        let embeddings: Vec<Vec<f32>> = inputs
            .iter()
            .map(|input| {
                let text = input.as_str().expect("embed input should be a string");
                let axis = if text.contains("force") { 0 } else { DIMENSION - 1 };
                let mut vector = vec![0.0; DIMENSION];
                vector[axis] = 1.0;
                vector
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

/// Scores every rerank candidate, later texts higher
struct AscendingReranker;

impl Respond for AscendingReranker {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("rerank request should be JSON");
        let count = body["texts"]
            .as_array()
            .expect("rerank request should carry texts")
            .len();

        let scores: Vec<serde_json::Value> = (0..count)
            .map(|index| json!({"index": index, "score": 0.1 + 0.2 * index as f32}))
            .collect();

        ResponseTemplate::new(200).set_body_json(serde_json::Value::Array(scores))
    }
}

/// Chat responder that rejects the primary model so generation falls
/// through to the fallback
struct PrimaryDownResponder {
    primary: String,
}

impl Respond for PrimaryDownResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("chat request should be JSON");

        if body["model"].as_str() == Some(self.primary.as_str()) {
            ResponseTemplate::new(404)
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "Fallback answer about net force."}
            }))
        }
    }
}

/// Start a mock server answering the embedding and rerank endpoints; chat
/// is mounted per test
async fn start_model_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(TopicEmbedder)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(AscendingReranker)
        .mount(&server)
        .await;
    server
}

async fn mount_chat(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": TUTOR_ANSWER}
        })))
        .mount(server)
        .await;
}

/// Config pointing both model endpoints at the mock server
fn test_config(temp_dir: &TempDir, server_uri: &str) -> Config {
    let url = Url::parse(server_uri).expect("mock server uri should parse");
    let host = url
        .host_str()
        .expect("mock server should have a host")
        .to_string();
    let port = url.port().expect("mock server should have a port");

    Config {
        base_dir: temp_dir.path().to_path_buf(),
        ollama: OllamaConfig {
            host: host.clone(),
            port,
            embedding_dimension: 4,
            ..OllamaConfig::default()
        },
        reranker: RerankerConfig {
            host,
            port,
            ..RerankerConfig::default()
        },
        ..Config::default()
    }
}

/// Two pages of mechanics notes; every chunk mentions force so the topic
/// embedder maps the whole document onto one axis
fn course_text() -> String {
    let first: Vec<String> = (0..150).map(|i| format!("force{i}")).collect();
    let second: Vec<String> = (0..150).map(|i| format!("force{i}")).collect();
    format!("[PAGE 3] {}\n\n[PAGE 4] {}", first.join(" "), second.join(" "))
}

/// Index the course notes, then reopen the stores and build the tool
/// handlers the way the serve command wires them
async fn index_and_build_handlers(
    config: &Config,
) -> (Arc<Database>, AskTutorHandler, SearchMaterialHandler) {
    let source_path = config.base_dir.join("mechanics_notes.txt");
    std::fs::write(&source_path, course_text()).expect("Failed to write course file");

    let mut ingestor = Ingestor::new(config.clone())
        .await
        .expect("Failed to create ingestor");
    let document = ingestor
        .add_document(&source_path, Some("Mechanics Notes".to_string()), Subject::Physics)
        .await
        .expect("Failed to index document");
    assert_eq!(document.total_chunks, 2);
    drop(ingestor);

    let database = Arc::new(
        Database::new(config.database_path())
            .await
            .expect("Failed to open database"),
    );
    let vector_store = Arc::new(
        VectorStore::new(config)
            .await
            .expect("Failed to open vector store"),
    );
    let ollama_client = Arc::new(OllamaClient::new(config).expect("Failed to create client"));
    let rerank_client = Arc::new(RerankClient::new(config).expect("Failed to create client"));

    let retriever = Arc::new(Retriever::new(
        vector_store,
        Arc::clone(&ollama_client),
        rerank_client,
        config.retrieval.clone(),
    ));
    let generator = Arc::new(HybridGenerator::new(ollama_client, config));
    let history = Arc::new(ConversationHistory::new(
        database.as_ref().clone(),
        config.generation.max_history_turns,
    ));

    let ask = AskTutorHandler::new(Arc::clone(&retriever), generator, history);
    let search = SearchMaterialHandler::new(retriever);

    (database, ask, search)
}

fn ask_params(question: &str, student: Option<&str>) -> CallToolParams {
    let mut arguments = HashMap::new();
    arguments.insert("question".to_string(), json!(question));
    if let Some(student) = student {
        arguments.insert("student".to_string(), json!(student));
    }

    CallToolParams {
        name: "ask_tutor".to_string(),
        arguments: Some(arguments),
    }
}

fn tool_response(result: &CallToolResult) -> serde_json::Value {
    assert_eq!(result.is_error, Some(false));
    let ToolContent::Text { text } = &result.content[0];
    serde_json::from_str(text).expect("Failed to parse tool response")
}

/// A question matching the indexed notes gets a grounded answer and the
/// turn lands in the conversation history
#[tokio::test(flavor = "multi_thread")]
async fn ask_tutor_answers_from_indexed_material() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let server = start_model_server().await;
    mount_chat(&server).await;

    let config = test_config(&temp_dir, &server.uri());
    let (database, ask, _search) = index_and_build_handlers(&config).await;

    let result = ask
        .handle(ask_params("What does a net force do to a moving cart?", None))
        .await
        .expect("Tool execution failed");

    let response = tool_response(&result);
    assert_eq!(response["answer"], TUTOR_ANSWER);
    assert_eq!(response["generator"], "primary");
    assert!(response["confidence"].as_f64().expect("confidence is a number") > 0.99);
    assert_eq!(response["pages"], json!([3, 4]));
    assert_eq!(response["sources"], json!(["Mechanics Notes"]));

    let turns = database
        .recent_conversation_turns("default", 5)
        .await
        .expect("Failed to load history");
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].question, "What does a net force do to a moving cart?");
    assert_eq!(turns[0].answer, TUTOR_ANSWER);
}

/// An off-topic question is refused without calling the chat model and
/// leaves no trace in the history
#[tokio::test(flavor = "multi_thread")]
async fn ask_tutor_refuses_off_topic_questions() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let server = start_model_server().await;
    mount_chat(&server).await;

    let config = test_config(&temp_dir, &server.uri());
    let (database, ask, _search) = index_and_build_handlers(&config).await;

    let result = ask
        .handle(ask_params("Who wrote the Iliad?", Some("homer")))
        .await
        .expect("Tool execution failed");

    let response = tool_response(&result);
    assert_eq!(response["answer"], REFUSAL_MESSAGE);
    assert_eq!(response["generator"], "none");
    assert_eq!(response["confidence"], 0.0);
    assert_eq!(response["pages"], json!([]));
    assert_eq!(response["sources"], json!([]));

    let turns = database
        .recent_conversation_turns("homer", 5)
        .await
        .expect("Failed to load history");
    assert!(turns.is_empty());

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    assert!(
        !requests.iter().any(|request| request.url.path() == "/api/chat"),
        "refusals must never reach the chat model"
    );
}

/// When the primary model rejects the request, the fallback answers and
/// the turn is still recorded
#[tokio::test(flavor = "multi_thread")]
async fn primary_failure_falls_back() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let server = start_model_server().await;

    let config = test_config(&temp_dir, &server.uri());
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(PrimaryDownResponder {
            primary: config.ollama.generation_model.clone(),
        })
        .mount(&server)
        .await;

    let (database, ask, _search) = index_and_build_handlers(&config).await;

    let result = ask
        .handle(ask_params("How does force change momentum?", Some("morgan")))
        .await
        .expect("Tool execution failed");

    let response = tool_response(&result);
    assert_eq!(response["answer"], "Fallback answer about net force.");
    assert_eq!(response["generator"], "fallback");

    let turns = database
        .recent_conversation_turns("morgan", 5)
        .await
        .expect("Failed to load history");
    assert_eq!(turns.len(), 1);
}

/// Raw passage search returns reranked chunks with their provenance
#[tokio::test(flavor = "multi_thread")]
async fn search_material_returns_ranked_passages() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let server = start_model_server().await;

    let config = test_config(&temp_dir, &server.uri());
    let (_database, _ask, search) = index_and_build_handlers(&config).await;

    let mut arguments = HashMap::new();
    arguments.insert("query".to_string(), json!("How does force relate to motion?"));
    arguments.insert("limit".to_string(), json!(5));

    let result = search
        .handle(CallToolParams {
            name: "search_material".to_string(),
            arguments: Some(arguments),
        })
        .await
        .expect("Tool execution failed");

    let response = tool_response(&result);
    let results = response["results"].as_array().expect("results is an array");
    assert_eq!(results.len(), 2);

    // Both chunks match the query exactly; the ascending reranker puts the
    // later candidate first.
    assert!((results[0]["rerank_score"].as_f64().expect("is a number") - 0.3).abs() < 1e-6);
    for row in results {
        assert!(row["content"].as_str().expect("content is text").contains("force"));
        assert_eq!(row["source"], "Mechanics Notes");
        assert!(row["similarity"].as_f64().expect("is a number") > 0.99);
    }

    let mut pages: Vec<i64> = results
        .iter()
        .map(|row| row["page"].as_i64().expect("page is a number"))
        .collect();
    pages.sort_unstable();
    assert_eq!(pages, vec![3, 4]);
}

/// A recorded turn shows up as user and assistant messages in the next
/// chat request for the same student
#[tokio::test(flavor = "multi_thread")]
async fn conversation_history_feeds_the_next_prompt() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let server = start_model_server().await;
    mount_chat(&server).await;

    let config = test_config(&temp_dir, &server.uri());
    let (_database, ask, _search) = index_and_build_handlers(&config).await;

    let first_question = "What does a constant force do over time?";
    let second_question = "How does that force change kinetic energy?";

    ask.handle(ask_params(first_question, Some("casey")))
        .await
        .expect("First ask failed");
    ask.handle(ask_params(second_question, Some("casey")))
        .await
        .expect("Second ask failed");

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    let chat_bodies: Vec<serde_json::Value> = requests
        .iter()
        .filter(|request| request.url.path() == "/api/chat")
        .map(|request| serde_json::from_slice(&request.body).expect("chat request should be JSON"))
        .collect();
    assert_eq!(chat_bodies.len(), 2);

    // First call: system prompt plus the question, no history yet.
    let first_messages = chat_bodies[0]["messages"].as_array().expect("messages");
    assert_eq!(first_messages.len(), 2);
    assert_eq!(first_messages[0]["role"], "system");

    // Second call replays the recorded turn before the new question.
    let second_messages = chat_bodies[1]["messages"].as_array().expect("messages");
    assert_eq!(second_messages.len(), 4);
    assert_eq!(second_messages[1]["role"], "user");
    assert_eq!(second_messages[1]["content"], first_question);
    assert_eq!(second_messages[2]["role"], "assistant");
    assert_eq!(second_messages[2]["content"], TUTOR_ANSWER);
    assert_eq!(second_messages[3]["role"], "user");
    assert!(
        second_messages[3]["content"]
            .as_str()
            .expect("content is text")
            .contains(second_question)
    );
}
