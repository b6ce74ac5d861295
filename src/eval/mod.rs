// Evaluation harness
// Runs the full ask pipeline over a JSON dataset of questions with
// expected keywords, scoring answers by keyword coverage and checking
// whether the keywords were even present in the retrieved context.


use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::generation::{GeneratorKind, HybridGenerator, StudentLevel};
use crate::retrieval::Retriever;

/// One dataset entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalItem {
    pub question: String,
    pub expected_keywords: Vec<String>,
    /// Optional student level; defaults to intermediate
    #[serde(default)]
    pub level: Option<String>,
}

/// Scored result for one dataset entry
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub question: String,
    pub generator: GeneratorKind,
    /// Base confidence from retrieval
    pub retrieval_score: f32,
    /// Fraction of expected keywords found in the answer
    pub keyword_score: f32,
    /// Whether every expected keyword appeared in the retrieved context
    pub grounded: bool,
}

/// Aggregates over a full evaluation run
#[derive(Debug, Clone, PartialEq)]
pub struct EvalAggregates {
    pub total: usize,
    pub mean_keyword_score: f32,
    /// Fraction of items whose context contained every expected keyword
    pub grounded_rate: f32,
    /// Items the confidence gate refused to answer
    pub refusals: usize,
}

/// Load an evaluation dataset from a JSON file
pub fn load_dataset(path: &Path) -> Result<Vec<EvalItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    let items: Vec<EvalItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse dataset: {}", path.display()))?;
    Ok(items)
}

/// Fraction of expected keywords contained in the answer,
/// case-insensitively. An empty keyword list scores 1.0.
pub fn keyword_score(answer: &str, expected_keywords: &[String]) -> f32 {
    if expected_keywords.is_empty() {
        return 1.0;
    }
    let answer_lower = answer.to_lowercase();
    let matches = expected_keywords
        .iter()
        .filter(|keyword| answer_lower.contains(&keyword.to_lowercase()))
        .count();
    matches as f32 / expected_keywords.len() as f32
}

/// Whether every expected keyword appears in the retrieved context
pub fn is_grounded(context: &str, expected_keywords: &[String]) -> bool {
    let context_lower = context.to_lowercase();
    expected_keywords
        .iter()
        .all(|keyword| context_lower.contains(&keyword.to_lowercase()))
}

/// Compute run-level aggregates
pub fn aggregate(outcomes: &[EvalOutcome]) -> EvalAggregates {
    let total = outcomes.len();
    if total == 0 {
        return EvalAggregates {
            total: 0,
            mean_keyword_score: 0.0,
            grounded_rate: 0.0,
            refusals: 0,
        };
    }

    let keyword_sum: f32 = outcomes.iter().map(|outcome| outcome.keyword_score).sum();
    let grounded = outcomes.iter().filter(|outcome| outcome.grounded).count();
    let refusals = outcomes
        .iter()
        .filter(|outcome| outcome.generator == GeneratorKind::None)
        .count();

    EvalAggregates {
        total,
        mean_keyword_score: keyword_sum / total as f32,
        grounded_rate: grounded as f32 / total as f32,
        refusals,
    }
}

/// Runs dataset items through the full ask pipeline
pub struct Evaluator {
    retriever: Retriever,
    generator: HybridGenerator,
}

impl Evaluator {
    #[inline]
    pub fn new(retriever: Retriever, generator: HybridGenerator) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Evaluate every item in order
    ///
    /// Evaluation is stateless: no conversation history is loaded or
    /// recorded, so items never influence each other.
    pub async fn run(&self, items: &[EvalItem]) -> Result<Vec<EvalOutcome>> {
        info!("Evaluating {} questions", items.len());
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            let level = item
                .level
                .as_deref()
                .map_or_else(StudentLevel::default, StudentLevel::from_input);

            let retrieval = self
                .retriever
                .retrieve(&item.question)
                .await
                .with_context(|| format!("Retrieval failed for: {}", item.question))?;
            let generated = self
                .generator
                .generate(&retrieval, &item.question, level, &[])
                .with_context(|| format!("Generation failed for: {}", item.question))?;

            let outcome = EvalOutcome {
                question: item.question.clone(),
                generator: generated.generator,
                retrieval_score: retrieval.base_confidence,
                keyword_score: keyword_score(&generated.answer, &item.expected_keywords),
                grounded: is_grounded(&retrieval.context, &item.expected_keywords),
            };
            debug!(
                "{}: keyword score {:.2}, grounded {}",
                outcome.question, outcome.keyword_score, outcome.grounded
            );
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}
