// Commands module
// CLI entry points for managing the course index, asking questions from
// the terminal, and running the MCP server over stdio.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use tracing::{error, info, warn};

use crate::config::{Config, get_config_dir};
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{DocumentStatus, Subject};
use crate::eval::{Evaluator, aggregate, load_dataset};
use crate::generation::{ConversationHistory, GeneratorKind, HybridGenerator, StudentLevel};
use crate::ingest::{ConsistencyChecker, Ingestor};
use crate::mcp::McpServer;
use crate::mcp::tools::{AskTutorHandler, ListDocumentsHandler, SearchMaterialHandler};
use crate::models::{OllamaClient, RerankClient};
use crate::retrieval::Retriever;

fn load_config() -> Result<Config> {
    let config_dir = get_config_dir().context("Failed to resolve config directory")?;
    Config::load(&config_dir).context("Failed to load configuration")
}

/// Index a course document
#[inline]
pub async fn add_document(file: &Path, name: Option<String>, subject: Subject) -> Result<()> {
    info!("Adding document: {}", file.display());

    let config = load_config()?;
    let mut ingestor = Ingestor::new(config)
        .await
        .context("Failed to initialize ingest pipeline")?;

    let document = ingestor.add_document(file, name, subject).await?;

    println!(
        "✅ Indexed document: {} (ID: {})",
        document.name, document.id
    );
    println!("   Subject: {}", document.subject);
    println!("   Chunks: {}", document.total_chunks);
    println!();
    println!("💡 Use 'tutor-mcp ask \"<question>\"' to query the material");

    Ok(())
}

/// List indexed documents with their status
#[inline]
pub async fn list_documents() -> Result<()> {
    let config = load_config()?;
    let database = Database::new(config.database_path())
        .await
        .context("Failed to initialize database")?;

    let documents = database
        .list_documents()
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("📚 No documents indexed yet.");
        println!("💡 Use 'tutor-mcp add <file>' to index course material.");
        return Ok(());
    }

    println!("📚 Indexed Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        let status_icon = match document.status {
            DocumentStatus::Completed => "✅",
            DocumentStatus::Indexing => "🔄",
            DocumentStatus::Pending => "⏳",
            DocumentStatus::Failed => "❌",
        };

        println!("{} {} (ID: {})", status_icon, document.name, document.id);
        println!("   Subject: {}", document.subject);
        println!("   Status: {}", document.status);
        println!("   Source: {}", document.source_path);
        println!("   Chunks: {}", document.total_chunks);
        println!(
            "   Added: {}",
            document.created_date.format("%Y-%m-%d %H:%M")
        );
        if let Some(indexed) = document.indexed_date {
            println!("   Indexed: {}", indexed.format("%Y-%m-%d %H:%M"));
        }
        if document.status == DocumentStatus::Failed {
            if let Some(message) = &document.error_message {
                println!("   Error: {}", message);
            }
        }
        println!();
    }

    let completed = documents.iter().filter(|d| d.is_completed()).count();
    let total_chunks: i64 = documents.iter().map(|d| d.total_chunks).sum();
    println!(
        "Summary: {} of {} completed, {} chunks indexed",
        completed,
        documents.len(),
        total_chunks
    );

    Ok(())
}

/// Delete a document and everything indexed from it
#[inline]
pub async fn delete_document(identifier: &str) -> Result<()> {
    info!("Deleting document: {}", identifier);

    let config = load_config()?;
    let mut ingestor = Ingestor::new(config)
        .await
        .context("Failed to initialize ingest pipeline")?;

    let document = ingestor.delete_document(identifier).await?;

    println!(
        "✅ Deleted document: {} (ID: {})",
        document.name, document.id
    );
    println!("   ✓ Document metadata removed");
    println!("   ✓ Content chunks removed");
    println!("   ✓ Vector embeddings removed");

    Ok(())
}

/// Rebuild both stores from the registered source files
#[inline]
pub async fn reindex_documents() -> Result<()> {
    info!("Reindexing all documents");

    let config = load_config()?;
    let mut ingestor = Ingestor::new(config)
        .await
        .context("Failed to initialize ingest pipeline")?;

    println!("🔄 Rebuilding the chunk and vector stores from source files...");
    let stats = ingestor.reindex_all().await?;

    println!("✅ Reindex complete:");
    println!("   Documents processed: {}", stats.documents_processed);
    println!("   Chunks created: {}", stats.chunks_created);
    println!("   Embeddings generated: {}", stats.embeddings_generated);
    if stats.errors_encountered > 0 {
        println!("   ⚠️  Errors: {}", stats.errors_encountered);
    }

    Ok(())
}

/// Answer a question from the terminal using the full retrieval pipeline
#[inline]
pub async fn ask_question(question: &str, level: Option<&str>, student: &str) -> Result<()> {
    let config = load_config()?;

    let database = Database::new(config.database_path())
        .await
        .context("Failed to initialize database")?;
    let vector_store = Arc::new(
        VectorStore::new(&config)
            .await
            .context("Failed to open vector store")?,
    );
    let ollama_client =
        Arc::new(OllamaClient::new(&config).context("Failed to initialize Ollama client")?);
    let rerank_client =
        Arc::new(RerankClient::new(&config).context("Failed to initialize reranker client")?);

    let retriever = Retriever::new(
        vector_store,
        Arc::clone(&ollama_client),
        rerank_client,
        config.retrieval.clone(),
    );
    let generator = HybridGenerator::new(ollama_client, &config);
    let history = ConversationHistory::new(database, config.generation.max_history_turns);

    let level = level.map_or_else(StudentLevel::default, StudentLevel::from_input);

    let turns = history
        .recent_turns(student)
        .await
        .context("Failed to load conversation history")?;
    let retrieval = retriever.retrieve(question).await?;
    let answer = generator.generate(&retrieval, question, level, &turns)?;

    if answer.generator != GeneratorKind::None {
        if let Err(e) = history.record_turn(student, question, &answer.answer).await {
            warn!("Failed to record conversation turn: {:#}", e);
        }
    }

    println!("{}", answer.answer);
    println!();
    println!(
        "Generator: {} | Confidence: {:.2}",
        answer.generator, answer.confidence
    );
    if !retrieval.sources.is_empty() {
        println!("Sources: {}", retrieval.sources.join(", "));
    }
    if !retrieval.pages.is_empty() {
        println!("Pages: {}", retrieval.pages.iter().join(", "));
    }

    Ok(())
}

/// Run the evaluation harness over a JSON dataset of questions
#[inline]
pub async fn run_eval(dataset: &Path) -> Result<()> {
    let config = load_config()?;

    let items = load_dataset(dataset)?;
    if items.is_empty() {
        println!("📭 Dataset is empty: {}", dataset.display());
        return Ok(());
    }

    let vector_store = Arc::new(
        VectorStore::new(&config)
            .await
            .context("Failed to open vector store")?,
    );
    let ollama_client =
        Arc::new(OllamaClient::new(&config).context("Failed to initialize Ollama client")?);
    let rerank_client =
        Arc::new(RerankClient::new(&config).context("Failed to initialize reranker client")?);

    let retriever = Retriever::new(
        vector_store,
        Arc::clone(&ollama_client),
        rerank_client,
        config.retrieval.clone(),
    );
    let generator = HybridGenerator::new(ollama_client, &config);
    let evaluator = Evaluator::new(retriever, generator);

    println!("🧪 Evaluating {} questions...", items.len());
    println!();

    let outcomes = evaluator.run(&items).await?;

    for outcome in &outcomes {
        let marker = if outcome.grounded { "✅" } else { "⚠️ " };
        println!(
            "{} [{}] keywords {:.0}% | retrieval {:.2} | {}",
            marker,
            outcome.generator,
            outcome.keyword_score * 100.0,
            outcome.retrieval_score,
            outcome.question
        );
    }

    let aggregates = aggregate(&outcomes);
    println!();
    println!("Summary:");
    println!("   Questions: {}", aggregates.total);
    println!(
        "   Mean keyword score: {:.1}%",
        aggregates.mean_keyword_score * 100.0
    );
    println!(
        "   Grounded rate: {:.1}%",
        aggregates.grounded_rate * 100.0
    );
    println!("   Refusals: {}", aggregates.refusals);

    Ok(())
}

/// Start the MCP server on stdio
///
/// Stdout carries the protocol, so all operator-facing output goes to
/// stderr. Health check failures are reported but do not block startup;
/// individual tool calls surface their own errors.
#[inline]
pub async fn serve_mcp() -> Result<()> {
    info!("Starting MCP server");

    let config = load_config()?;

    let database = Arc::new(
        Database::new(config.database_path())
            .await
            .context("Failed to initialize database")?,
    );
    let vector_store = Arc::new(
        VectorStore::new(&config)
            .await
            .context("Failed to open vector store")?,
    );
    let ollama_client =
        Arc::new(OllamaClient::new(&config).context("Failed to initialize Ollama client")?);
    let rerank_client =
        Arc::new(RerankClient::new(&config).context("Failed to initialize reranker client")?);

    match ollama_client.health_check() {
        Ok(()) => info!(
            "Ollama connected at {}:{}",
            config.ollama.host, config.ollama.port
        ),
        Err(e) => {
            warn!("Ollama health check failed: {:#}", e);
            eprintln!("⚠️  Ollama is not responding; tool calls may fail until it is available.");
        }
    }
    if let Err(e) = rerank_client.health_check() {
        warn!("Reranker health check failed: {:#}", e);
        eprintln!("⚠️  Reranker is not responding; tool calls may fail until it is available.");
    }

    let retriever = Arc::new(Retriever::new(
        Arc::clone(&vector_store),
        Arc::clone(&ollama_client),
        Arc::clone(&rerank_client),
        config.retrieval.clone(),
    ));
    let generator = Arc::new(HybridGenerator::new(Arc::clone(&ollama_client), &config));
    let history = Arc::new(ConversationHistory::new(
        database.as_ref().clone(),
        config.generation.max_history_turns,
    ));

    let server = Arc::new(McpServer::new(
        "tutor-mcp".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    ));

    server
        .register_tool(
            AskTutorHandler::tool_definition(),
            AskTutorHandler::new(
                Arc::clone(&retriever),
                Arc::clone(&generator),
                Arc::clone(&history),
            ),
        )
        .await;
    server
        .register_tool(
            SearchMaterialHandler::tool_definition(),
            SearchMaterialHandler::new(Arc::clone(&retriever)),
        )
        .await;
    server
        .register_tool(
            ListDocumentsHandler::tool_definition(),
            ListDocumentsHandler::new(Arc::clone(&database)),
        )
        .await;

    info!("MCP server initialized");
    eprintln!("🚀 Tutor MCP server listening on stdio");
    eprintln!("   Tools: ask_tutor, search_material, list_documents");
    eprintln!("   Press Ctrl+C to stop");

    let mut restart_count: u32 = 0;
    const MAX_RESTARTS: u32 = 3;

    loop {
        tokio::select! {
            result = Arc::clone(&server).serve_stdio() => {
                match result {
                    Ok(()) => {
                        info!("MCP server stopped normally");
                        break;
                    }
                    Err(e) => {
                        error!(
                            "MCP server error (attempt {}/{}): {:#}",
                            restart_count + 1,
                            MAX_RESTARTS + 1,
                            e
                        );
                        restart_count += 1;

                        if restart_count > MAX_RESTARTS {
                            error!("Maximum restart attempts reached, shutting down");
                            break;
                        }

                        eprintln!("⚠️  MCP server error, restarting in 5 seconds...");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt signal, shutting down");
                break;
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Report connectivity and index health
#[inline]
pub async fn show_status() -> Result<()> {
    let config = load_config()?;

    println!("📊 Tutor MCP Status");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Storage:");
    let database = match Database::new(config.database_path()).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected");
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: {}", e);
            None
        }
    };
    let mut vector_store = match VectorStore::new(&config).await {
        Ok(store) => {
            println!("   ✅ LanceDB: Connected");
            Some(store)
        }
        Err(e) => {
            println!("   ❌ LanceDB: {}", e);
            None
        }
    };

    println!();
    println!("🤖 Ollama:");
    match OllamaClient::new(&config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Embedding model: {}", config.ollama.embedding_model);
                println!("   📋 Generation model: {}", config.ollama.generation_model);
                println!("   📋 Fallback model: {}", config.ollama.fallback_model);
            }
            Err(e) => println!("   ⚠️  Not responding: {}", e),
        },
        Err(e) => println!("   ❌ {}", e),
    }

    println!();
    println!("🎯 Reranker:");
    match RerankClient::new(&config) {
        Ok(client) => match client.health_check() {
            Ok(()) => println!(
                "   ✅ Connected ({}:{})",
                config.reranker.host, config.reranker.port
            ),
            Err(e) => println!("   ⚠️  Not responding: {}", e),
        },
        Err(e) => println!("   ❌ {}", e),
    }

    if let Some(database) = database.as_ref() {
        if let Some(vector_store) = vector_store.as_mut() {
            println!();
            println!("🔍 Consistency:");
            let checker = ConsistencyChecker::new(database, vector_store);
            match checker.validate().await {
                Ok(report) => {
                    if report.is_consistent {
                        println!("   ✅ {}", report.summary());
                    } else {
                        println!("   ⚠️  {}", report.summary());
                        println!("   💡 Run 'tutor-mcp reindex' to rebuild both stores");
                    }
                }
                Err(e) => println!("   ❌ Consistency check failed: {}", e),
            }
        }

        println!();
        println!("📚 Documents:");
        match database.list_documents().await {
            Ok(documents) => {
                if documents.is_empty() {
                    println!("   📭 No documents indexed yet");
                } else {
                    let completed = documents.iter().filter(|d| d.is_completed()).count();
                    let indexing = documents
                        .iter()
                        .filter(|d| d.status == DocumentStatus::Indexing)
                        .count();
                    let pending = documents
                        .iter()
                        .filter(|d| d.status == DocumentStatus::Pending)
                        .count();
                    let failed = documents
                        .iter()
                        .filter(|d| d.status == DocumentStatus::Failed)
                        .count();
                    let total_chunks: i64 = documents.iter().map(|d| d.total_chunks).sum();

                    println!("   📊 Total: {}", documents.len());
                    println!("   ✅ Completed: {}", completed);
                    println!("   🔄 Indexing: {}", indexing);
                    println!("   ⏳ Pending: {}", pending);
                    println!("   ❌ Failed: {}", failed);
                    println!("   📄 Chunks indexed: {}", total_chunks);
                }
            }
            Err(e) => println!("   ❌ Failed to load documents: {}", e),
        }
    }

    println!();
    println!("💡 Next steps:");
    println!("   • 'tutor-mcp add <file>' indexes course material");
    println!("   • 'tutor-mcp ask \"<question>\"' answers from the terminal");
    println!("   • 'tutor-mcp serve' starts the MCP server for assistants");

    Ok(())
}
