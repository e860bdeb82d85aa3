//! Query engine: embed a question and return the nearest stored chunks

#[cfg(test)]
mod tests;

use serde::Serialize;
use tracing::debug;

use crate::embeddings::{Embedder, embed_query};
use crate::errors::PipelineError;
use crate::index::IndexPair;
use crate::loader::Provenance;

/// Number of matches returned when the caller does not say otherwise
pub const DEFAULT_K: usize = 5;

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    /// 1-based rank
    pub rank: usize,
    /// Position of the chunk in the index
    pub ordinal: usize,
    pub text: String,
    pub provenance: Provenance,
    /// Euclidean distance to the query; smaller is closer
    pub distance: f32,
}

/// Return up to `k` chunks of `pair` closest to `query_text`
///
/// `k` is clamped to the index size. The embedder must be the model the index
/// was built with; anything else is rejected rather than silently compared.
#[inline]
pub fn query(
    query_text: &str,
    pair: &IndexPair,
    embedder: &dyn Embedder,
    k: usize,
) -> Result<Vec<QueryMatch>, PipelineError> {
    if query_text.trim().is_empty() {
        return Err(PipelineError::EmptyQuery);
    }

    let manifest = pair.manifest();
    if embedder.model_id() != manifest.model_id {
        return Err(PipelineError::ModelMismatch {
            index_model: manifest.model_id.clone(),
            query_model: embedder.model_id().to_string(),
        });
    }

    if k == 0 || pair.is_empty() {
        return Ok(Vec::new());
    }

    let query_vector = embed_query(embedder, query_text)?;
    let neighbors = pair.index().search(&query_vector, k)?;

    let matches = neighbors
        .into_iter()
        .enumerate()
        .map(|(position, neighbor)| {
            let chunk = pair.chunks().get(neighbor.ordinal).ok_or_else(|| {
                PipelineError::index_unavailable(format!(
                    "ordinal {} has no stored chunk",
                    neighbor.ordinal
                ))
            })?;
            Ok(QueryMatch {
                rank: position + 1,
                ordinal: neighbor.ordinal,
                text: chunk.text.clone(),
                provenance: chunk.provenance.clone(),
                distance: neighbor.distance,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    debug!(
        "Query returned {} of {} requested matches from {} chunks",
        matches.len(),
        k,
        pair.len()
    );

    Ok(matches)
}
