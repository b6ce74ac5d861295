// Consistency checking between the SQLite chunk table and the LanceDB
// vector table. The two stores share chunk_seq as row identity, so any
// divergence shows up as a set difference over sequence numbers.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::DocumentStatus;

/// Report of consistency issues between SQLite and LanceDB
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    /// Number of chunk rows in SQLite
    pub sqlite_chunks: usize,
    /// Number of embedding rows in LanceDB
    pub lancedb_embeddings: usize,
    /// Chunk sequence numbers present in SQLite but missing from LanceDB
    pub missing_embeddings: Vec<i64>,
    /// Chunk sequence numbers present in LanceDB but absent from SQLite
    pub orphaned_embeddings: Vec<i64>,
    /// Per-document breakdown of missing embeddings
    pub document_issues: Vec<DocumentConsistencyIssue>,
    /// Whether the two stores hold exactly the same chunk_seq set
    pub is_consistent: bool,
}

/// A document whose chunks are not fully represented in the vector table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConsistencyIssue {
    pub document_id: i64,
    pub document_name: String,
    /// Chunk rows the document owns in SQLite
    pub expected_chunks: usize,
    /// How many of those have an embedding row
    pub actual_embeddings: usize,
}

/// Statistics from a cleanup operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    /// Orphaned vector rows that were deleted
    pub orphaned_removed: usize,
    /// Missing embeddings that remain; only a reindex can restore them
    pub missing_remaining: usize,
}

impl ConsistencyReport {
    /// Total number of individual issues found
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_embeddings.len() + self.orphaned_embeddings.len()
    }

    /// Human-readable one-line summary of the report
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Databases are consistent: {} chunks in SQLite, {} embeddings in LanceDB",
                self.sqlite_chunks, self.lancedb_embeddings
            )
        } else {
            let mut parts = Vec::new();
            if !self.missing_embeddings.is_empty() {
                parts.push(format!(
                    "{} chunks without embeddings",
                    self.missing_embeddings.len()
                ));
            }
            if !self.orphaned_embeddings.is_empty() {
                parts.push(format!(
                    "{} orphaned embeddings",
                    self.orphaned_embeddings.len()
                ));
            }
            if !self.document_issues.is_empty() {
                parts.push(format!("{} documents affected", self.document_issues.len()));
            }
            format!(
                "Inconsistencies found ({} chunks in SQLite, {} embeddings in LanceDB): {}",
                self.sqlite_chunks,
                self.lancedb_embeddings,
                parts.join(", ")
            )
        }
    }
}

/// Compares the SQLite chunk table against the LanceDB vector table
pub struct ConsistencyChecker<'a> {
    database: &'a Database,
    vector_store: &'a mut VectorStore,
}

impl<'a> ConsistencyChecker<'a> {
    #[inline]
    pub fn new(database: &'a Database, vector_store: &'a mut VectorStore) -> Self {
        Self {
            database,
            vector_store,
        }
    }

    /// Compare the chunk_seq sets held by the two stores
    ///
    /// # Returns
    /// A report listing missing and orphaned sequence numbers and the
    /// documents affected by missing embeddings
    pub async fn validate(&self) -> Result<ConsistencyReport> {
        debug!("Validating consistency between SQLite and LanceDB");

        let sqlite_seqs: HashSet<i64> = self
            .database
            .all_chunk_seqs()
            .await
            .context("Failed to list chunk sequence numbers from SQLite")?
            .into_iter()
            .collect();

        let lancedb_seqs: HashSet<i64> = self
            .vector_store
            .all_chunk_seqs()
            .await
            .context("Failed to list chunk sequence numbers from LanceDB")?
            .into_iter()
            .collect();

        let mut missing_embeddings: Vec<i64> =
            sqlite_seqs.difference(&lancedb_seqs).copied().collect();
        missing_embeddings.sort_unstable();

        let mut orphaned_embeddings: Vec<i64> =
            lancedb_seqs.difference(&sqlite_seqs).copied().collect();
        orphaned_embeddings.sort_unstable();

        let document_issues = self.collect_document_issues(&lancedb_seqs).await?;

        let is_consistent = missing_embeddings.is_empty() && orphaned_embeddings.is_empty();

        let report = ConsistencyReport {
            sqlite_chunks: sqlite_seqs.len(),
            lancedb_embeddings: lancedb_seqs.len(),
            missing_embeddings,
            orphaned_embeddings,
            document_issues,
            is_consistent,
        };

        info!("{}", report.summary());
        Ok(report)
    }

    /// Remove orphaned vector rows found by a validation pass
    ///
    /// Missing embeddings are only counted; restoring them requires
    /// re-embedding the chunk text, which a full reindex performs.
    pub async fn cleanup(&mut self, report: &ConsistencyReport) -> Result<CleanupStats> {
        let mut stats = CleanupStats {
            orphaned_removed: 0,
            missing_remaining: report.missing_embeddings.len(),
        };

        if !report.orphaned_embeddings.is_empty() {
            self.vector_store
                .delete_chunk_seqs(&report.orphaned_embeddings)
                .await
                .context("Failed to delete orphaned embeddings")?;
            stats.orphaned_removed = report.orphaned_embeddings.len();
            info!("Removed {} orphaned embeddings", stats.orphaned_removed);
        }

        if stats.missing_remaining > 0 {
            warn!(
                "{} chunks still lack embeddings; run a reindex to restore them",
                stats.missing_remaining
            );
        }

        Ok(stats)
    }

    /// Build the per-document issue list for chunks lacking embeddings
    async fn collect_document_issues(
        &self,
        lancedb_seqs: &HashSet<i64>,
    ) -> Result<Vec<DocumentConsistencyIssue>> {
        let documents = self
            .database
            .list_documents()
            .await
            .context("Failed to list documents")?;

        let mut issues = Vec::new();
        for document in documents {
            // Documents that never finished indexing are expected to be
            // incomplete and are repaired by their own status handling.
            if document.status != DocumentStatus::Completed {
                continue;
            }

            let seqs = self
                .database
                .chunk_seqs_for_document(document.id)
                .await
                .with_context(|| {
                    format!("Failed to list chunk seqs for document {}", document.id)
                })?;

            let expected_chunks = seqs.len();
            let actual_embeddings = seqs
                .iter()
                .filter(|seq| lancedb_seqs.contains(seq))
                .count();

            if actual_embeddings != expected_chunks {
                issues.push(DocumentConsistencyIssue {
                    document_id: document.id,
                    document_name: document.name,
                    expected_chunks,
                    actual_embeddings,
                });
            }
        }

        Ok(issues)
    }
}
