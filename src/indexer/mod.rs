// Indexer module
// Per-project processing: stage documents, build the index pair off the async
// runtime, swap it in and keep the documents' processed flags consistent


pub mod queue;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{Document, DocumentFlag};
use crate::embeddings::{Embedder, ModelRegistry};
use crate::index::{IndexPair, IndexStore};
use crate::pipeline::{self, BuildOutcome, BuildStats, NoDataReason, PipelineConfig};
use crate::query::QueryMatch;

pub use queue::{JobQueue, JobWorker, QueueConfig};

/// Result of one processing run that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A new index pair replaced the previous one
    Built {
        generation: String,
        stats: BuildStats,
        documents: usize,
        contributing: usize,
    },
    /// Nothing was built; flags and the previous index are unchanged
    NoData(NoDataReason),
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Built {
                stats,
                documents,
                contributing,
                ..
            } => write!(
                f,
                "Indexed {contributing} of {documents} documents: {stats}"
            ),
            ProcessOutcome::NoData(reason) => write!(f, "Nothing to process: {reason}"),
        }
    }
}

/// Builds and queries the index pair of a project
pub struct ProjectProcessor {
    database: Database,
    store: IndexStore,
    embedder: Arc<dyn Embedder>,
    pipeline: PipelineConfig,
}

impl ProjectProcessor {
    #[inline]
    pub fn new(
        database: Database,
        store: IndexStore,
        embedder: Arc<dyn Embedder>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            database,
            store,
            embedder,
            pipeline,
        }
    }

    /// Processor using the configured model from the shared registry
    #[inline]
    pub async fn from_config(config: &Config, database: Database) -> Result<Self> {
        let embedding = config.embedding.clone();
        let models_dir = config.models_dir();
        let embedder = tokio::task::spawn_blocking(move || {
            ModelRegistry::global().get_or_load(&embedding, &models_dir)
        })
        .await
        .context("Embedding model loader panicked")??;

        Ok(Self::new(
            database,
            IndexStore::new(config.indexes_dir()),
            embedder,
            PipelineConfig::from_config(config),
        ))
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Rebuild the index pair of a project from all of its documents
    ///
    /// Runs only when at least one document is unprocessed. On any failure or
    /// when nothing could be indexed, every processed flag is put back and the
    /// previous index pair stays in place.
    pub async fn process(&self, user_id: i64, project_id: i64) -> Result<ProcessOutcome> {
        let project = self.database.require_project(user_id, project_id).await?;
        let documents = self.database.list_documents(project.id, user_id).await?;

        let unprocessed: Vec<String> = documents
            .iter()
            .filter(|document| !document.processed)
            .map(|document| document.id.clone())
            .collect();
        if unprocessed.is_empty() {
            info!("Project {} has no unprocessed documents", project.name);
            return Ok(ProcessOutcome::NoData(NoDataReason::NoDocuments));
        }

        info!(
            "Processing project {} ({} documents, {} unprocessed)",
            project.name,
            documents.len(),
            unprocessed.len()
        );

        let saved_flags: Vec<DocumentFlag> = documents.iter().map(DocumentFlag::from).collect();
        self.database.set_processed(&unprocessed, true).await?;

        let (pair, stats) = match self.build(&documents).await {
            Ok((BuildOutcome::Built(pair), stats)) => (pair, stats),
            Ok((BuildOutcome::NoData(reason), _)) => {
                self.rollback(&saved_flags).await?;
                info!("Nothing indexed for project {}: {}", project.name, reason);
                return Ok(ProcessOutcome::NoData(reason));
            }
            Err(e) => {
                error!("Build failed for project {}: {:#}", project.name, e);
                self.rollback_after_error(&saved_flags).await;
                return Err(e);
            }
        };

        let contributing = contributing_documents(&pair);
        let generation = match self.swap(user_id, project.id, pair).await {
            Ok(generation) => generation,
            Err(e) => {
                error!("Failed to store index for project {}: {:#}", project.name, e);
                self.rollback_after_error(&saved_flags).await;
                return Err(e);
            }
        };

        self.commit(project.id, user_id, &documents, &contributing)
            .await
            .with_context(|| {
                format!(
                    "Index generation {generation} is live but processed flags of project {} \
                     could not be updated",
                    project.name
                )
            })?;

        let outcome = ProcessOutcome::Built {
            generation,
            stats,
            documents: documents.len(),
            contributing: contributing.len(),
        };
        info!("Project {}: {}", project.name, outcome);
        Ok(outcome)
    }

    /// Answer a question from the persisted index pair of a project
    pub async fn answer_query(
        &self,
        user_id: i64,
        project_id: i64,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<QueryMatch>> {
        self.database.require_project(user_id, project_id).await?;

        let store = self.store.clone();
        let embedder = Arc::clone(&self.embedder);
        let query_text = query_text.to_string();
        let matches = tokio::task::spawn_blocking(move || {
            pipeline::answer_query(&store, embedder.as_ref(), user_id, project_id, &query_text, k)
        })
        .await
        .context("Query task panicked")??;

        Ok(matches)
    }

    /// Stage every document into a scratch folder and build from it
    async fn build(&self, documents: &[Document]) -> Result<(BuildOutcome, BuildStats)> {
        let staging = TempDir::new().context("Failed to create staging directory")?;
        for document in documents {
            let source = self.database.document_path(document);
            match tokio::fs::read(&source).await {
                Ok(bytes) => {
                    let target = staging.path().join(document.stored_name());
                    tokio::fs::write(&target, bytes)
                        .await
                        .with_context(|| format!("Failed to stage {}", target.display()))?;
                }
                Err(e) => warn!(
                    "Skipping document {} ({}): {}",
                    document.id,
                    source.display(),
                    e
                ),
            }
        }
        debug!(
            "Staged {} documents in {}",
            documents.len(),
            staging.path().display()
        );

        let embedder = Arc::clone(&self.embedder);
        let config = self.pipeline.clone();
        let built = tokio::task::spawn_blocking(move || {
            let result =
                pipeline::build_index_with_stats(staging.path(), &config, embedder.as_ref());
            drop(staging);
            result
        })
        .await
        .map_err(|e| anyhow!("Build task panicked: {e}"))??;

        Ok(built)
    }

    async fn swap(&self, user_id: i64, project_id: i64, pair: IndexPair) -> Result<String> {
        let store = self.store.clone();
        let generation =
            tokio::task::spawn_blocking(move || store.write(user_id, project_id, &pair))
                .await
                .context("Index write task panicked")??;
        Ok(generation)
    }

    /// Make the flags match the new pair: processed iff the document contributed
    ///
    /// If the transactional commit fails, the non-contributing documents are
    /// cleared directly; contributing ones are already marked.
    async fn commit(
        &self,
        project_id: i64,
        user_id: i64,
        documents: &[Document],
        contributing: &HashSet<String>,
    ) -> Result<()> {
        let commit_error = match self
            .database
            .commit_processed(project_id, user_id, contributing)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        error!(
            "Failed to commit processed flags of project {}: {:#}",
            project_id, commit_error
        );

        let non_contributing: Vec<String> = documents
            .iter()
            .filter(|document| !contributing.contains(&document.id))
            .map(|document| document.id.clone())
            .collect();
        match self.database.set_processed(&non_contributing, false).await {
            Ok(_) => {
                warn!(
                    "Cleared processed flag of {} non-contributing documents of project {}",
                    non_contributing.len(),
                    project_id
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to clear processed flags of project {}: {:#}",
                    project_id, e
                );
                Err(commit_error)
            }
        }
    }

    /// Roll back after a failed build, keeping the build error as the one reported
    async fn rollback_after_error(&self, saved_flags: &[DocumentFlag]) {
        if let Err(e) = self.rollback(saved_flags).await {
            error!(
                "Processed flags of {} documents may be stale: {:#}",
                saved_flags.len(),
                e
            );
        }
    }

    async fn rollback(&self, saved_flags: &[DocumentFlag]) -> Result<()> {
        self.database
            .restore_flags(saved_flags)
            .await
            .context("Failed to roll back processed flags")?;
        debug!("Rolled back processed flags of {} documents", saved_flags.len());
        Ok(())
    }
}

/// Ids of the documents that own at least one chunk of `pair`
fn contributing_documents(pair: &IndexPair) -> HashSet<String> {
    pair.chunks()
        .chunks
        .iter()
        .filter_map(|chunk| chunk.provenance.document_id.clone())
        .collect()
}
