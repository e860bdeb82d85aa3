//! Build pipeline: load → chunk → embed → index
//!
//! [`build_index`] is synchronous and CPU/IO heavy; async callers run it on a
//! blocking thread. "Nothing to index" is reported as
//! [`BuildOutcome::NoData`], never as an error.


use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::Config;
use crate::embeddings::{ChunkingConfig, Embedder, chunk_units, embed_texts};
use crate::errors::PipelineError;
use crate::index::{IndexPair, IndexStore};
use crate::loader::load_documents;
use crate::query::{QueryMatch, query};

/// Settings for one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: 32,
        }
    }
}

impl PipelineConfig {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Why a build produced no index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataReason {
    /// The folder holds no file of a supported type
    NoDocuments,
    /// Supported files exist but none yielded any text
    NoTextUnits,
    /// Text was extracted but chunking produced nothing
    NoChunks,
}

impl fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NoDataReason::NoDocuments => write!(f, "no supported documents found"),
            NoDataReason::NoTextUnits => write!(f, "no text could be extracted from the documents"),
            NoDataReason::NoChunks => write!(f, "the extracted text produced no chunks"),
        }
    }
}

#[derive(Debug)]
pub enum BuildOutcome {
    Built(IndexPair),
    NoData(NoDataReason),
}

impl BuildOutcome {
    #[inline]
    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built(_))
    }
}

/// Counters gathered while building
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub files_seen: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub units: usize,
    pub chunks: usize,
    pub dimension: usize,
    pub elapsed: Duration,
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files ({} failed, {} skipped), {} text units, {} chunks",
            self.files_seen, self.files_failed, self.files_skipped, self.units, self.chunks
        )?;
        if self.dimension > 0 {
            write!(f, ", {} dimensions", self.dimension)?;
        }
        write!(f, " in {:.1}s", self.elapsed.as_secs_f64())
    }
}

/// Build an index pair from every supported document in `folder`
#[inline]
pub fn build_index(
    folder: &Path,
    config: &PipelineConfig,
    embedder: &dyn Embedder,
) -> Result<BuildOutcome, PipelineError> {
    build_index_with_stats(folder, config, embedder).map(|(outcome, _)| outcome)
}

/// Like [`build_index`], also returning what the build saw
pub fn build_index_with_stats(
    folder: &Path,
    config: &PipelineConfig,
    embedder: &dyn Embedder,
) -> Result<(BuildOutcome, BuildStats), PipelineError> {
    let started = Instant::now();
    config.chunking.validate()?;

    info!("Loading documents from {}", folder.display());
    let report = load_documents(folder)?;
    let mut stats = BuildStats {
        files_seen: report.files_seen,
        files_failed: report.failures.len(),
        files_skipped: report.skipped.len(),
        units: report.units.len(),
        ..BuildStats::default()
    };

    if report.units.is_empty() {
        stats.elapsed = started.elapsed();
        let reason = if report.files_seen == 0 {
            NoDataReason::NoDocuments
        } else {
            NoDataReason::NoTextUnits
        };
        info!("Nothing to index in {}: {}", folder.display(), reason);
        return Ok((BuildOutcome::NoData(reason), stats));
    }

    let chunks = chunk_units(&report.units, &config.chunking)?;
    stats.chunks = chunks.len();
    if chunks.is_empty() {
        stats.elapsed = started.elapsed();
        info!("Nothing to index in {}: {}", folder.display(), NoDataReason::NoChunks);
        return Ok((BuildOutcome::NoData(NoDataReason::NoChunks), stats));
    }

    info!(
        "Embedding {} chunks with {} (batch size {})",
        chunks.len(),
        embedder.model_id(),
        config.batch_size
    );
    let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    let vectors = embed_texts(embedder, &texts, config.batch_size)?;

    let pair = IndexPair::build(embedder.model_id(), &vectors, chunks)?;
    stats.dimension = pair.index().dimension();
    stats.elapsed = started.elapsed();

    info!("Built index for {}: {}", folder.display(), stats);
    Ok((BuildOutcome::Built(pair), stats))
}

/// Load the persisted pair of a project and run `query` against it
#[inline]
pub fn answer_query(
    store: &IndexStore,
    embedder: &dyn Embedder,
    user_id: i64,
    project_id: i64,
    query_text: &str,
    k: usize,
) -> Result<Vec<QueryMatch>, PipelineError> {
    if query_text.trim().is_empty() {
        return Err(PipelineError::EmptyQuery);
    }
    let pair = store.read(user_id, project_id)?;
    query(query_text, &pair, embedder, k)
}
