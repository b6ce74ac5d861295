use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tutor_mcp::commands::{
    add_document, ask_question, delete_document, list_documents, reindex_documents, run_eval,
    serve_mcp, show_status,
};
use tutor_mcp::config::{get_config_dir, run_interactive_config, show_config};
use tutor_mcp::database::sqlite::models::Subject;
use tutor_mcp::{Result, TutorError};

#[derive(Parser)]
#[command(name = "tutor-mcp")]
#[command(about = "A retrieval-augmented tutoring backend with MCP server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure model connections and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a course document to the index
    Add {
        /// Path to the text file to index
        file: PathBuf,
        /// Optional name for the document, defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        /// Subject area: math, physics, chemistry, biology, or general
        #[arg(long, default_value = "general")]
        subject: Subject,
    },
    /// List all indexed documents
    List,
    /// Delete a document and its indexed content
    Delete {
        /// Document ID or name to delete
        document: String,
    },
    /// Re-chunk and re-embed every document from its source file
    Reindex,
    /// Ask a question against the indexed material
    Ask {
        /// The question to answer
        question: String,
        /// Student level: beginner, intermediate, or advanced
        #[arg(long)]
        level: Option<String>,
        /// Student identifier used for conversation history
        #[arg(long, default_value = "default")]
        student: String,
    },
    /// Score the pipeline against a JSON dataset of questions
    Eval {
        /// Path to the evaluation dataset
        dataset: PathBuf,
    },
    /// Start MCP server on stdio
    Serve,
    /// Show connectivity and index health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries MCP protocol traffic in serve mode, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            let config_dir = get_config_dir().map_err(|e| TutorError::Config(e.to_string()))?;
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Add {
            file,
            name,
            subject,
        } => {
            add_document(&file, name, subject).await?;
        }
        Commands::List => {
            list_documents().await?;
        }
        Commands::Delete { document } => {
            delete_document(&document).await?;
        }
        Commands::Reindex => {
            reindex_documents().await?;
        }
        Commands::Ask {
            question,
            level,
            student,
        } => {
            ask_question(&question, level.as_deref(), &student).await?;
        }
        Commands::Eval { dataset } => {
            run_eval(&dataset).await?;
        }
        Commands::Serve => {
            serve_mcp().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
