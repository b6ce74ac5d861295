// Database module
// This module handles the dual store: SQLite for chunk/document metadata,
// LanceDB for embeddings

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
