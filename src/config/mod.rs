// Configuration management module
// Handles the TOML configuration file and the directories derived from it

pub mod settings;

#[cfg(test)]
mod tests;

use anyhow::Result;
use console::style;
use std::path::Path;

pub use settings::{
    Config, ConfigError, EmbeddingBackend, EmbeddingConfig, OllamaConfig, QueryConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Write a default `config.toml` into `base_dir` unless one already exists
#[inline]
pub fn init_config(base_dir: &Path) -> Result<Config> {
    let config = Config::load(base_dir)?;
    if config.config_file_path().exists() {
        eprintln!(
            "{}",
            style("Configuration file already exists, leaving it untouched.").yellow()
        );
        return Ok(config);
    }

    config.save()?;
    eprintln!("{}", style("✓ Configuration saved successfully!").green());
    eprintln!("Config file: {}", style(config.config_file_path().display()).dim());
    Ok(config)
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Backend: {}", style(config.embedding.backend).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Model ID: {}", style(config.embedding.model_id()).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    match config.embedding.backend {
        EmbeddingBackend::Ollama => match config.embedding.ollama.ollama_url() {
            Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
            Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
        },
        EmbeddingBackend::Hashing => {
            eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
        }
        EmbeddingBackend::Fastembed => {
            eprintln!("  Model Cache: {}", style(config.models_dir().display()).cyan());
        }
    }
    eprintln!();

    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!("  Chunk Overlap: {}", style(config.chunking.chunk_overlap).cyan());
    eprintln!();

    eprintln!("{}", style("Queries & Jobs:").bold().yellow());
    eprintln!("  Default k: {}", style(config.query.default_k).cyan());
    eprintln!("  Max Attempts: {}", style(config.queue.max_attempts).cyan());
    eprintln!(
        "  Job Timeout: {}s",
        style(config.queue.processing_timeout_seconds).cyan()
    );
    eprintln!(
        "  Job Heartbeat: {}ms",
        style(config.queue.heartbeat_interval_ms).cyan()
    );
    eprintln!();

    eprintln!("Config file: {}", style(config.config_file_path().display()).dim());
    eprintln!("Data directory: {}", style(config.get_base_dir().display()).dim());
}
