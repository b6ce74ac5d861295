#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::models::request_with_retry;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Client for a text-embeddings-inference style reranker service
///
/// The service hosts a cross-encoder that scores each query/passage pair
/// jointly instead of comparing cached embeddings.
#[derive(Debug, Clone)]
pub struct RerankClient {
    base_url: Url,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

/// Relevance score for one input passage
///
/// `index` points back into the request's texts array, so callers can
/// reorder their own candidate list without matching on text content.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

impl RerankClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .reranker
            .reranker_url()
            .context("Failed to generate reranker URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Check that the reranker service is responsive
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/health")
            .context("Failed to build health URL")?;

        debug!("Checking reranker health at {}", url);

        request_with_retry(self.retry_attempts, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Reranker health check failed")?;

        debug!("Reranker health check passed");
        Ok(())
    }

    /// Score every text against the query with the cross-encoder
    ///
    /// Returns one entry per input text. The service reports results in its
    /// own order; callers sort by score themselves.
    #[inline]
    pub fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<RerankScore>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Reranking {} passages", texts.len());

        let request = RerankRequest { query, texts };

        let url = self
            .base_url
            .join("/rerank")
            .context("Failed to build rerank URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize rerank request")?;

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to rerank passages")?;

        let scores: Vec<RerankScore> =
            serde_json::from_str(&response_text).context("Failed to parse rerank response")?;

        if scores.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                scores.len()
            ));
        }

        for score in &scores {
            if score.index >= texts.len() {
                return Err(anyhow::anyhow!(
                    "Rerank index {} out of range for {} texts",
                    score.index,
                    texts.len()
                ));
            }
        }

        Ok(scores)
    }
}
