use ::fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::info;

use crate::embeddings::Embedder;
use crate::errors::PipelineError;

/// Local ONNX sentence-embedding model
pub struct FastEmbedder {
    model_id: String,
    dimension: usize,
    model: Mutex<TextEmbedding>,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// Resolve a configured model name, accepting the short sentence-transformers names
fn resolve_model(name: &str) -> Result<EmbeddingModel, PipelineError> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok(EmbeddingModel::AllMiniLML6V2)
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            Ok(EmbeddingModel::AllMiniLML12V2)
        }
        other => other
            .parse::<EmbeddingModel>()
            .map_err(|e| PipelineError::ModelLoad {
                model: other.to_string(),
                message: e.to_string(),
            }),
    }
}

impl FastEmbedder {
    /// Load (downloading on first use) the model into `cache_dir`
    #[inline]
    pub fn load(model_name: &str, cache_dir: &Path) -> Result<Self, PipelineError> {
        let model = resolve_model(model_name)?;
        let load_error = |e: &dyn std::fmt::Display| PipelineError::ModelLoad {
            model: model_name.to_string(),
            message: e.to_string(),
        };

        info!("Loading embedding model: {}", model_name);
        let options = TextInitOptions::new(model)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(console::user_attended_stderr());
        let mut embedding = TextEmbedding::try_new(options).map_err(|e| load_error(&e))?;

        // Embed once so the dimension is known before any real batch
        let sample = embedding
            .embed(vec!["dimension check"], None)
            .map_err(|e| load_error(&e))?;
        let dimension = sample.first().map_or(0, Vec::len);
        if dimension == 0 {
            return Err(load_error(&"model produced an empty vector"));
        }

        info!(
            "Model {} loaded successfully. Dimension: {}",
            model_name, dimension
        );

        Ok(Self {
            model_id: format!("fastembed/{model_name}"),
            dimension,
            model: Mutex::new(embedding),
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Embedder for FastEmbedder {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model_id
    }

    #[inline]
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        model
            .embed(texts, Some(texts.len().max(1)))
            .map_err(|e| PipelineError::embedding(e.to_string()))
    }
}
