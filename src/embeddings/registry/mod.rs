//! Process-wide cache of loaded embedding models
//!
//! Loading a sentence-transformer model is expensive, so every pipeline run
//! and query in the process shares one instance per embedding configuration.


use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::embeddings::Embedder;
use crate::embeddings::fastembed::FastEmbedder;
use crate::embeddings::hashing::HashingEmbedder;
use crate::embeddings::ollama::OllamaClient;
use crate::errors::PipelineError;

static GLOBAL_REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();

#[derive(Default)]
pub struct ModelRegistry {
    models: Mutex<HashMap<String, Arc<dyn Embedder>>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loaded", &self.loaded_keys())
            .finish()
    }
}

/// Key identifying one loaded model instance
#[inline]
pub fn registry_key(config: &EmbeddingConfig) -> String {
    match config.backend {
        EmbeddingBackend::Ollama => format!(
            "{}@{}://{}:{}",
            config.model_id(),
            config.ollama.protocol,
            config.ollama.host,
            config.ollama.port
        ),
        EmbeddingBackend::Fastembed | EmbeddingBackend::Hashing => config.model_id(),
    }
}

impl ModelRegistry {
    /// The registry shared by the whole process
    #[inline]
    pub fn global() -> &'static ModelRegistry {
        GLOBAL_REGISTRY.get_or_init(ModelRegistry::default)
    }

    /// Return the shared embedder for `config`, loading it on first use
    ///
    /// Concurrent callers asking for the same configuration wait for the
    /// first load instead of loading a second copy.
    #[inline]
    pub fn get_or_load(
        &self,
        config: &EmbeddingConfig,
        models_dir: &Path,
    ) -> Result<Arc<dyn Embedder>, PipelineError> {
        let key = registry_key(config);
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(embedder) = models.get(&key) {
            debug!("Using cached embedding model {}", key);
            return Ok(Arc::clone(embedder));
        }

        let embedder = load_embedder(config, models_dir)?;
        info!("Registered embedding model {}", key);
        models.insert(key, Arc::clone(&embedder));
        Ok(embedder)
    }

    /// Register an already constructed embedder under `key`
    #[inline]
    pub fn insert(&self, key: impl Into<String>, embedder: Arc<dyn Embedder>) {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), embedder);
    }

    /// Drop the registry's handle on a model; in-flight users keep theirs
    #[inline]
    pub fn release(&self, config: &EmbeddingConfig) -> bool {
        let key = registry_key(config);
        let removed = self
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some();
        if removed {
            info!("Released embedding model {}", key);
        }
        removed
    }

    /// Release every model
    #[inline]
    pub fn shutdown(&self) {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let count = models.len();
        models.clear();
        drop(models);
        info!("Embedding model registry shut down ({} models released)", count);
    }

    #[inline]
    pub fn is_loaded(&self, config: &EmbeddingConfig) -> bool {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&registry_key(config))
    }

    #[inline]
    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// Construct a new embedder for `config` without caching it
#[inline]
pub fn load_embedder(
    config: &EmbeddingConfig,
    models_dir: &Path,
) -> Result<Arc<dyn Embedder>, PipelineError> {
    let model_load_error = |message: String| PipelineError::ModelLoad {
        model: config.model.clone(),
        message,
    };

    config
        .validate()
        .map_err(|e| model_load_error(e.to_string()))?;

    let embedder: Arc<dyn Embedder> = match config.backend {
        EmbeddingBackend::Fastembed => Arc::new(FastEmbedder::load(&config.model, models_dir)?),
        EmbeddingBackend::Ollama => {
            let client = OllamaClient::new(&config.ollama, &config.model)
                .map_err(|e| model_load_error(format!("{e:#}")))?;
            Arc::new(client)
        }
        EmbeddingBackend::Hashing => {
            Arc::new(HashingEmbedder::new(config.model_id(), config.dimension)?)
        }
    };

    Ok(embedder)
}
