
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

use crate::loader::DocumentKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    /// 8-char lowercase alphanumeric id, unique across all projects
    pub id: String,
    pub project_id: i64,
    pub user_id: i64,
    /// Name the document was uploaded under
    pub file_name: String,
    /// Extension of the stored file (`pdf`, `html`, `txt`, `md`)
    pub kind: String,
    pub size_bytes: i64,
    pub processed: bool,
    pub uploaded_date: NaiveDateTime,
}

impl Document {
    #[inline]
    pub fn document_kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_extension(&self.kind)
    }

    /// File name inside the managed documents directory
    #[inline]
    pub fn stored_name(&self) -> String {
        format!("{}.{}", self.id, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub project_id: i64,
    pub user_id: i64,
    pub file_name: String,
    pub kind: DocumentKind,
    pub size_bytes: i64,
}

/// Saved `processed` flag of one document, used to undo optimistic updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentFlag {
    pub id: String,
    pub processed: bool,
}

impl From<&Document> for DocumentFlag {
    #[inline]
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            processed: document.processed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// UUID v4 handle returned on submit
    pub id: String,
    pub project_id: i64,
    pub user_id: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub error_message: Option<String>,
    pub result_message: Option<String>,
    pub created_date: NaiveDateTime,
    pub started_date: Option<NaiveDateTime>,
    /// Last sign of life from the worker running the job
    pub heartbeat_date: Option<NaiveDateTime>,
    pub finished_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match *self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl Job {
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// One-line description of where the job stands
    #[inline]
    pub fn summary(&self) -> String {
        match self.status {
            JobStatus::Failed => format!(
                "failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            JobStatus::Succeeded => match self.result_message.as_deref() {
                Some(message) => format!("succeeded: {message}"),
                None => "succeeded".to_string(),
            },
            JobStatus::Pending | JobStatus::Running => self.status.as_str().to_string(),
        }
    }
}
