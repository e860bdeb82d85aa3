// Embeddings module
// Chunking, the embedder abstraction and its backends


pub mod chunking;
pub mod fastembed;
pub mod hashing;
pub mod ollama;
pub mod registry;

use tracing::debug;

use crate::errors::PipelineError;

pub use chunking::{Chunk, Chunker, ChunkingConfig, chunk_units};
pub use hashing::HashingEmbedder;
pub use registry::ModelRegistry;

/// Maps text to fixed-dimension vectors
///
/// Implementations must return one vector per input, in input order, and be
/// deterministic for identical text. They are shared between threads, so any
/// interior mutability lives behind a lock.
pub trait Embedder: Send + Sync {
    /// Stable identifier recorded in every index built with this embedder
    fn model_id(&self) -> &str;

    /// Encode one batch of texts
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Embed `texts` in batches of `batch_size`, validating every returned vector
///
/// All vectors must share one dimension and contain only finite values. An
/// empty input never reaches the embedder.
#[inline]
pub fn embed_texts(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    if batch_size == 0 {
        return Err(PipelineError::InvalidSettings {
            message: "batch_size must be greater than zero".to_string(),
        });
    }

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    let mut dimension: Option<usize> = None;

    for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
        let batch_vectors = embedder.embed_batch(batch)?;
        if batch_vectors.len() != batch.len() {
            return Err(PipelineError::embedding(format!(
                "model returned {} vectors for {} texts",
                batch_vectors.len(),
                batch.len()
            )));
        }

        for vector in &batch_vectors {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            if vector.is_empty() {
                return Err(PipelineError::embedding("model returned an empty vector"));
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(PipelineError::embedding("model returned non-finite values"));
            }
        }

        debug!(
            "Embedded batch {} ({} texts) with {}",
            batch_index + 1,
            batch.len(),
            embedder.model_id()
        );
        vectors.extend(batch_vectors);
    }

    Ok(vectors)
}

/// Embed a single query string
#[inline]
pub fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, PipelineError> {
    embed_texts(embedder, &[text], 1)?
        .pop()
        .ok_or_else(|| PipelineError::embedding("model returned no vector for the query"))
}
