use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocvaultError>;

#[derive(Error, Debug)]
pub enum DocvaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] errors::PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod errors;
pub mod fetch;
pub mod http;
pub mod index;
pub mod indexer;
pub mod loader;
pub mod pipeline;
pub mod query;
