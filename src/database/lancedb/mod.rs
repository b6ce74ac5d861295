// LanceDB vector database module
// Stores one embedding row per chunk, appended in chunk_seq order so the
// vector table stays in lockstep with the SQLite chunks table


pub mod vector_store;

pub use vector_store::{SearchResult, VectorStore};

use serde::{Deserialize, Serialize};

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Global chunk sequence number, shared with the SQLite chunks table
    pub chunk_seq: i64,
    /// The embedding vector (unit length, fixed dimension per table)
    pub vector: Vec<f32>,
    /// Chunk fields carried alongside the vector
    pub metadata: ChunkMetadata,
}

/// Chunk fields stored alongside an embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// ID of the owning document in the SQLite database
    pub document_id: i64,
    /// The chunk text that was embedded and is returned as context
    pub content: String,
    /// Page number within the source document
    pub page: i64,
    /// Name of the source document
    pub source: String,
    /// Timestamp when this embedding was created
    pub created_at: String,
}
