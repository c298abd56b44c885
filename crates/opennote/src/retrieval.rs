//! Note retrieval: free-text queries in, matching note fragments out.
//!
//! All queries are embedded in one batched call. Each embedding is then
//! searched independently; a failed search only empties its own entry.
//! Output is index-aligned with the input queries.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::providers::{EmbeddingProvider, VectorIndex};

/// Matches for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub result: Vec<String>,
}

#[derive(Clone)]
pub struct NoteRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl NoteRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn retrieve(&self, queries: &[String], top_k: usize) -> Result<Vec<QueryResult>, AppError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed(queries).await?;
        if embeddings.len() != queries.len() {
            return Err(AppError::VectorProvider(format!(
                "embedding provider returned {} vectors for {} queries",
                embeddings.len(),
                queries.len()
            )));
        }

        let searches = embeddings.iter().map(|embedding| self.search(embedding, top_k));
        let results = join_all(searches).await;

        debug!("Retrieved notes for {} queries (top_k={})", queries.len(), top_k);
        Ok(queries
            .iter()
            .zip(results)
            .map(|(query, result)| QueryResult {
                query: query.clone(),
                result,
            })
            .collect())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Vec<String> {
        match self.index.query(embedding, top_k, true).await {
            Ok(matches) => matches
                .iter()
                .filter_map(|m| m.content().map(str::to_string))
                .collect(),
            Err(e) => {
                warn!("Vector search failed, returning no notes for this query: {}", e);
                Vec::new()
            }
        }
    }
}
