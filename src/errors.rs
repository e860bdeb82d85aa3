//! Pipeline Error Handling
//!
//! Errors raised by the load → chunk → embed → index pipeline and by the
//! query engine. Per-file load failures are not raised through this type;
//! they are collected in a [`crate::loader::LoadReport`] instead.

use std::path::PathBuf;
use thiserror::Error;

const REPROCESS_HINT: &str = "Please reprocess your documents.";

/// Errors that abort a build or a query
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Document directory {path} could not be read: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pipeline settings: {message}")]
    InvalidSettings { message: String },

    #[error("Embedding model '{model}' failed to load: {message}")]
    ModelLoad { model: String, message: String },

    #[error("Embedding failed: {message}")]
    Embedding { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index was built with model '{index_model}' but queries use '{query_model}'")]
    ModelMismatch {
        index_model: String,
        query_model: String,
    },

    #[error("Failed to write index: {message}")]
    IndexWrite { message: String },

    #[error("Index unavailable: {reason}")]
    IndexUnavailable { reason: String },

    #[error("Query text is empty")]
    EmptyQuery,
}

impl PipelineError {
    #[inline]
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    #[inline]
    pub fn index_write(message: impl Into<String>) -> Self {
        Self::IndexWrite {
            message: message.into(),
        }
    }

    #[inline]
    pub fn index_unavailable(reason: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the caller can only recover by rebuilding the project index
    #[inline]
    pub fn requires_reprocess(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable { .. }
                | Self::ModelMismatch { .. }
                | Self::DimensionMismatch { .. }
        )
    }

    /// Human readable message suitable for end users
    #[inline]
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyQuery => "No query provided.".to_string(),
            Self::IndexUnavailable { .. } => format!(
                "The vector database for this project is missing or damaged. {}",
                REPROCESS_HINT
            ),
            Self::ModelMismatch { .. } | Self::DimensionMismatch { .. } => format!(
                "The vector database was built with a different embedding model. {}",
                REPROCESS_HINT
            ),
            Self::ModelLoad { .. } | Self::Embedding { .. } => {
                format!("An error occurred while embedding text: {}", self)
            }
            Self::DirectoryUnreadable { .. }
            | Self::InvalidSettings { .. }
            | Self::IndexWrite { .. } => {
                format!("An error occurred while processing documents: {}", self)
            }
        }
    }
}
