//! MCP Tools Implementation
//!
//! Concrete tool handlers for the tutoring server: question answering over
//! the indexed material, raw passage search, and document listing. Handlers
//! report operational failures through `CallToolResult::is_error` so MCP
//! clients can show them; only malformed calls become protocol errors.

use crate::database::sqlite::Database;
use crate::generation::{ConversationHistory, GeneratorKind, HybridGenerator, StudentLevel};
use crate::mcp::protocol::*;
use crate::mcp::server::ToolHandler;
use crate::retrieval::Retriever;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Student identifier used when a tool call does not name one
const DEFAULT_STUDENT: &str = "default";

/// Build a failed tool result carrying an error description
fn error_result(text: String) -> CallToolResult {
    CallToolResult {
        content: vec![ToolContent::Text { text }],
        is_error: Some(true),
    }
}

/// Build a successful tool result from a JSON response body
fn json_result(response: &serde_json::Value) -> Result<CallToolResult> {
    Ok(CallToolResult {
        content: vec![ToolContent::Text {
            text: serde_json::to_string_pretty(response)?,
        }],
        is_error: Some(false),
    })
}

/// Question answering tool handler
///
/// Runs the full ask pipeline: conversation history load, retrieval,
/// gated generation, and history recording for answered turns.
pub struct AskTutorHandler {
    retriever: Arc<Retriever>,
    generator: Arc<HybridGenerator>,
    history: Arc<ConversationHistory>,
}

/// Passage search tool handler
pub struct SearchMaterialHandler {
    retriever: Arc<Retriever>,
}

/// Document listing tool handler
pub struct ListDocumentsHandler {
    database: Arc<Database>,
}

impl AskTutorHandler {
    /// Create a new ask tutor handler
    #[inline]
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<HybridGenerator>,
        history: Arc<ConversationHistory>,
    ) -> Self {
        Self {
            retriever,
            generator,
            history,
        }
    }

    /// Create the ask_tutor tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "ask_tutor".to_string(),
            description: Some("Ask a question about the indexed course material".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The student's question"
                    },
                    "level": {
                        "type": "string",
                        "description": "Optional: student level (beginner, intermediate, advanced)"
                    },
                    "student": {
                        "type": "string",
                        "description": "Optional: student identifier for conversation history"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AskTutorHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing required parameter: question"))?;

        let level = args
            .get("level")
            .and_then(|v| v.as_str())
            .map_or_else(StudentLevel::default, StudentLevel::from_input);

        let student = args
            .get("student")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_STUDENT);

        debug!(
            "Answering question for student '{}' at level {}: {}",
            student, level, question
        );

        let turns = match self.history.recent_turns(student).await {
            Ok(turns) => turns,
            Err(e) => {
                error!("Failed to load conversation history: {:#}", e);
                return Ok(error_result(format!(
                    "Failed to load conversation history: {:#}",
                    e
                )));
            }
        };

        let retrieval = match self.retriever.retrieve(question).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                error!("Retrieval failed: {:#}", e);
                return Ok(error_result(format!("Retrieval failed: {:#}", e)));
            }
        };

        let answer = match self.generator.generate(&retrieval, question, level, &turns) {
            Ok(answer) => answer,
            Err(e) => {
                error!("Generation failed: {:#}", e);
                return Ok(error_result(format!("Generation failed: {:#}", e)));
            }
        };

        // Refusals are not part of the conversation; only answered turns
        // feed future context windows.
        if answer.generator != GeneratorKind::None {
            if let Err(e) = self.history.record_turn(student, question, &answer.answer).await {
                warn!(
                    "Failed to record conversation turn for '{}': {:#}",
                    student, e
                );
            }
        }

        let response = json!({
            "answer": answer.answer,
            "generator": answer.generator.as_str(),
            "confidence": answer.confidence,
            "pages": retrieval.pages,
            "sources": retrieval.sources,
        });

        json_result(&response)
    }
}

impl SearchMaterialHandler {
    /// Create a new search material handler
    #[inline]
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    /// Create the search_material tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "search_material".to_string(),
            description: Some("Search the indexed course material for passages".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of passages (default: 10)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchMaterialHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing required parameter: query"))?;

        let limit = args
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(10)
            .max(1) as usize;

        debug!("Searching material: query='{}', limit={}", query, limit);

        match self.retriever.search(query, limit).await {
            Ok(result) => {
                let results: Vec<_> = result
                    .chunks
                    .iter()
                    .map(|chunk| {
                        json!({
                            "content": chunk.text,
                            "page": chunk.page,
                            "source": chunk.source,
                            "similarity": chunk.similarity,
                            "rerank_score": chunk.rerank_score,
                        })
                    })
                    .collect();

                json_result(&json!({ "results": results }))
            }
            Err(e) => {
                error!("Error searching material: {:#}", e);
                Ok(error_result(format!("Search error: {:#}", e)))
            }
        }
    }
}

impl ListDocumentsHandler {
    /// Create a new list documents handler
    #[inline]
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Create the list_documents tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "list_documents".to_string(),
            description: Some("List registered course documents".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for ListDocumentsHandler {
    #[inline]
    async fn handle(&self, _params: CallToolParams) -> Result<CallToolResult> {
        debug!("Listing registered documents");

        match self.database.list_documents().await {
            Ok(documents) => {
                let rows: Vec<_> = documents
                    .iter()
                    .map(|document| {
                        json!({
                            "id": document.id,
                            "name": document.name,
                            "subject": document.subject.as_str(),
                            "status": document.status.to_string().to_lowercase(),
                            "chunks": document.total_chunks,
                            "indexed_date": document
                                .indexed_date
                                .map(|d| d.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                        })
                    })
                    .collect();

                json_result(&json!({ "documents": rows }))
            }
            Err(e) => {
                error!("Error listing documents: {}", e);
                Ok(error_result(format!("Error listing documents: {}", e)))
            }
        }
    }
}
