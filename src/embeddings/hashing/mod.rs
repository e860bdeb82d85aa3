#[cfg(test)]
mod tests;

use crate::embeddings::Embedder;
use crate::errors::PipelineError;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-features embedder
///
/// Each lowercase word and each character trigram is hashed into one of
/// `dimension` buckets with a hash-derived sign, and the result is
/// L2-normalized. Texts sharing vocabulary end up close together, which is
/// enough for offline use and tests without downloading a model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Result<Self, PipelineError> {
        if dimension == 0 {
            return Err(PipelineError::InvalidSettings {
                message: "hashing embedder dimension must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            model_id: model_id.into(),
            dimension,
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let word = word.to_lowercase();
            self.add_feature(&mut vector, word.as_bytes(), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.add_feature(&mut vector, trigram.as_bytes(), 0.5);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = usize::try_from(hash % self.dimension as u64).unwrap_or(0);
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model_id
    }

    #[inline]
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
