// Retrieval module
// First half of the ask pipeline: vector search over chunk embeddings,
// similarity filtering, cross-encoder reranking, and context assembly.


use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::database::lancedb::{SearchResult, VectorStore};
use crate::models::{OllamaClient, RerankClient, RerankScore};

/// A chunk selected for the final context, with both scoring passes attached
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_seq: i64,
    pub text: String,
    pub page: i64,
    pub source: String,
    /// Raw inner-product similarity from the vector search
    pub similarity: f32,
    /// Cross-encoder score that determined the final order
    pub rerank_score: f32,
}

/// Outcome of one retrieval pass
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Selected chunk texts joined by newlines, in rerank order
    pub context: String,
    /// Page numbers covered by the selection, deduplicated and sorted
    pub pages: Vec<i64>,
    /// Source document names covered by the selection, deduplicated and sorted
    pub sources: Vec<String>,
    /// Highest raw similarity across the unfiltered candidates; 0.0 when
    /// the index returned nothing
    pub base_confidence: f32,
    /// The selected chunks in final order
    pub chunks: Vec<RankedChunk>,
}

impl RetrievalResult {
    /// Result for a query where no candidate survived filtering
    ///
    /// The confidence still reflects the raw candidate scores, so the
    /// caller can distinguish "nothing relevant at all" from "close but
    /// under the threshold".
    fn empty(base_confidence: f32) -> Self {
        Self {
            context: String::new(),
            pages: Vec::new(),
            sources: Vec::new(),
            base_confidence,
            chunks: Vec::new(),
        }
    }

    /// Whether any chunks were selected
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Runs the retrieval pipeline against the vector store and model services
///
/// All service handles are injected at construction; a retrieval call
/// reads shared state but never mutates it, so one retriever can serve
/// any number of sequential queries.
pub struct Retriever {
    vector_store: Arc<VectorStore>,
    ollama_client: Arc<OllamaClient>,
    rerank_client: Arc<RerankClient>,
    config: RetrievalConfig,
}

impl Retriever {
    #[inline]
    pub fn new(
        vector_store: Arc<VectorStore>,
        ollama_client: Arc<OllamaClient>,
        rerank_client: Arc<RerankClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vector_store,
            ollama_client,
            rerank_client,
            config,
        }
    }

    /// Retrieve context for a question using the configured parameters
    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        self.retrieve_with(
            query,
            self.config.top_k,
            self.config.final_k,
            self.config.score_threshold,
        )
        .await
    }

    /// Ranked passages for browsing, without the relevance gate
    ///
    /// Over-fetches at least the configured candidate pool so reranking has
    /// material to work with, drops only negatively similar candidates
    /// instead of applying the configured threshold, and returns up to
    /// `limit` passages.
    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Result<RetrievalResult> {
        self.retrieve_with(query, limit.max(self.config.top_k), limit, 0.0)
            .await
    }

    /// Retrieve context with explicit parameters
    ///
    /// # Arguments
    /// * `query` - The question text; embedded with the query prefix
    /// * `top_k` - Candidates fetched from the vector index
    /// * `final_k` - Passages kept after reranking
    /// * `score_threshold` - Minimum raw similarity to survive filtering
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        final_k: usize,
        score_threshold: f32,
    ) -> Result<RetrievalResult> {
        let query_vector = self
            .ollama_client
            .embed_query(query)
            .context("Failed to embed query")?;

        let candidates = self
            .vector_store
            .search_similar(&query_vector, top_k, None)
            .await
            .context("Vector search failed")?;

        // Confidence comes from the raw scores, before the threshold has
        // a chance to empty the candidate set.
        let base_confidence = max_similarity(&candidates);

        let filtered = apply_score_threshold(candidates, score_threshold);
        debug!(
            "Retrieval: {} candidates above threshold {}, base confidence {:.3}",
            filtered.len(),
            score_threshold,
            base_confidence
        );

        if filtered.is_empty() {
            return Ok(RetrievalResult::empty(base_confidence));
        }

        let texts: Vec<String> = filtered
            .iter()
            .map(|candidate| candidate.metadata.content.clone())
            .collect();
        let scores = self
            .rerank_client
            .rerank(query, &texts)
            .context("Failed to rerank candidates")?;

        let selected = select_final_chunks(filtered, &scores, final_k);
        Ok(assemble_result(selected, base_confidence))
    }
}

/// Highest raw similarity across the candidates, 0.0 for an empty set
fn max_similarity(candidates: &[SearchResult]) -> f32 {
    candidates
        .iter()
        .map(|candidate| candidate.similarity_score)
        .reduce(f32::max)
        .unwrap_or(0.0)
}

/// Keep candidates whose raw similarity meets the threshold
#[inline]
pub fn apply_score_threshold(candidates: Vec<SearchResult>, threshold: f32) -> Vec<SearchResult> {
    candidates
        .into_iter()
        .filter(|candidate| candidate.similarity_score >= threshold)
        .collect()
}

/// Reorder candidates by rerank score and keep the best `final_k`
///
/// Scores are joined back to candidates by positional index, never by
/// text, so byte-identical chunks stay distinct. The sort is stable:
/// equal rerank scores keep the similarity order the candidates arrived
/// in.
#[inline]
pub fn select_final_chunks(
    candidates: Vec<SearchResult>,
    scores: &[RerankScore],
    final_k: usize,
) -> Vec<RankedChunk> {
    let mut rerank_scores = vec![0.0f32; candidates.len()];
    for score in scores {
        if let Some(slot) = rerank_scores.get_mut(score.index) {
            *slot = score.score;
        }
    }

    let mut ranked: Vec<RankedChunk> = candidates
        .into_iter()
        .enumerate()
        .map(|(position, candidate)| RankedChunk {
            chunk_seq: candidate.chunk_seq,
            text: candidate.metadata.content,
            page: candidate.metadata.page,
            source: candidate.metadata.source,
            similarity: candidate.similarity_score,
            rerank_score: rerank_scores[position],
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(final_k);
    ranked
}

/// Join the selected chunks into the final context and provenance sets
fn assemble_result(chunks: Vec<RankedChunk>, base_confidence: f32) -> RetrievalResult {
    let context = chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let pages: Vec<i64> = chunks
        .iter()
        .map(|chunk| chunk.page)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let sources: Vec<String> = chunks
        .iter()
        .map(|chunk| chunk.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    RetrievalResult {
        context,
        pages,
        sources,
        base_confidence,
        chunks,
    }
}
