use anyhow::{Context, Result, anyhow, bail};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::sqlite::models::{
    Document, DocumentFlag, NewDocument, NewProject, Project,
};
use crate::database::sqlite::queries::{DocumentQueries, ProjectQueries};
use crate::loader::{DOCUMENT_ID_LEN, DocumentKind};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_ID_ATTEMPTS: usize = 10;

/// Metadata store plus the managed directory holding document files
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
    documents_dir: PathBuf,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P, documents_dir: PathBuf) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        fs::create_dir_all(&documents_dir).with_context(|| {
            format!(
                "Failed to create documents directory: {}",
                documents_dir.display()
            )
        })?;

        let database = Self {
            pool,
            documents_dir,
        };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_config(config: &Config) -> Result<Self> {
        let base_dir = config.get_base_dir();
        fs::create_dir_all(base_dir).with_context(|| {
            format!("Failed to create base directory: {}", base_dir.display())
        })?;

        Self::new(config.database_path(), config.documents_dir()).await
    }

    // Project operations
    pub async fn create_project(&self, user_id: i64, name: &str) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Project name cannot be empty");
        }
        if ProjectQueries::get_by_name(&self.pool, user_id, name)
            .await?
            .is_some()
        {
            bail!("Project '{}' already exists", name);
        }

        let project = ProjectQueries::create(
            &self.pool,
            NewProject {
                user_id,
                name: name.to_string(),
            },
        )
        .await?;
        info!("Created project {} ({})", project.name, project.id);
        Ok(project)
    }

    pub async fn get_project(&self, user_id: i64, project_id: i64) -> Result<Option<Project>> {
        ProjectQueries::get_for_user(&self.pool, user_id, project_id).await
    }

    /// Like [`Self::get_project`], failing when the project is not the user's
    pub async fn require_project(&self, user_id: i64, project_id: i64) -> Result<Project> {
        self.get_project(user_id, project_id)
            .await?
            .ok_or_else(|| anyhow!("Project {} not found for user {}", project_id, user_id))
    }

    pub async fn list_projects(&self, user_id: i64) -> Result<Vec<Project>> {
        ProjectQueries::list_for_user(&self.pool, user_id).await
    }

    // Document operations
    /// Copy a local file into the managed directory and register it
    pub async fn upload_document(&self, project: &Project, source: &Path) -> Result<Document> {
        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Invalid file name: {}", source.display()))?
            .to_string();
        let bytes = fs::read(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;

        self.store_document(project, &file_name, &bytes).await
    }

    /// Register `bytes` as a new document of `project` named `file_name`
    ///
    /// The document gets a fresh 8-char id; the extension of `file_name`
    /// decides its kind and unsupported extensions are rejected.
    pub async fn store_document(
        &self,
        project: &Project,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        let kind = DocumentKind::from_path(Path::new(file_name)).ok_or_else(|| {
            anyhow!(
                "Unsupported document type: {} (expected .pdf, .html, .htm, .txt, .md)",
                file_name
            )
        })?;

        let new_document = NewDocument {
            project_id: project.id,
            user_id: project.user_id,
            file_name: file_name.to_string(),
            kind,
            size_bytes: i64::try_from(bytes.len()).context("Document is too large")?,
        };

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = generate_document_id();
            let path = self
                .documents_dir
                .join(format!("{}.{}", id, kind.extension()));
            if path.exists() {
                continue;
            }

            match DocumentQueries::create(&self.pool, &id, &new_document).await {
                Ok(document) => {
                    if let Err(e) = fs::write(&path, bytes) {
                        DocumentQueries::delete(&self.pool, &id).await?;
                        return Err(e)
                            .with_context(|| format!("Failed to write {}", path.display()));
                    }
                    info!(
                        "Stored document {} as {} in project {}",
                        file_name, document.id, project.id
                    );
                    return Ok(document);
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    debug!("Document id {} already taken (attempt {})", id, attempt);
                }
                Err(e) => return Err(e).context("Failed to create document"),
            }
        }

        bail!(
            "Failed to allocate a unique document id after {} attempts",
            MAX_ID_ATTEMPTS
        )
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    pub async fn list_documents(&self, project_id: i64, user_id: i64) -> Result<Vec<Document>> {
        DocumentQueries::list_for_project(&self.pool, project_id, user_id).await
    }

    pub async fn list_unprocessed_documents(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<Vec<Document>> {
        DocumentQueries::list_unprocessed(&self.pool, project_id, user_id).await
    }

    #[inline]
    pub fn document_path(&self, document: &Document) -> PathBuf {
        self.documents_dir.join(document.stored_name())
    }

    pub fn read_document_bytes(&self, document: &Document) -> Result<Vec<u8>> {
        let path = self.document_path(document);
        fs::read(&path).with_context(|| format!("Failed to read document {}", path.display()))
    }

    pub async fn set_processed(&self, ids: &[String], processed: bool) -> Result<u64> {
        DocumentQueries::set_processed(&self.pool, ids, processed).await
    }

    pub async fn restore_flags(&self, flags: &[DocumentFlag]) -> Result<u64> {
        DocumentQueries::restore_flags(&self.pool, flags).await
    }

    pub async fn commit_processed(
        &self,
        project_id: i64,
        user_id: i64,
        contributed: &HashSet<String>,
    ) -> Result<()> {
        DocumentQueries::commit_processed(&self.pool, project_id, user_id, contributed).await
    }

    pub async fn delete_document(&self, document: &Document) -> Result<bool> {
        let path = self.document_path(document);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove document file {}: {}", path.display(), e);
        }
        DocumentQueries::delete(&self.pool, &document.id).await
    }
}

/// Random 8-char lowercase alphanumeric id
fn generate_document_id() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(DOCUMENT_ID_LEN)
        .map(|byte| char::from(ID_ALPHABET[usize::from(*byte) % ID_ALPHABET.len()]))
        .collect()
}
