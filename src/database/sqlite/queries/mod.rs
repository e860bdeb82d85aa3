
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::debug;

const PROJECT_COLUMNS: &str = "id, user_id, name, created_date";
const DOCUMENT_COLUMNS: &str =
    "id, project_id, user_id, file_name, kind, size_bytes, processed, uploaded_date";
const JOB_COLUMNS: &str = "id, project_id, user_id, status, attempts, error_message, \
                           result_message, created_date, started_date, heartbeat_date, \
                           finished_date";

#[inline]
fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub struct ProjectQueries;

impl ProjectQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_project: NewProject) -> Result<Project> {
        let id = sqlx::query("INSERT INTO projects (user_id, name, created_date) VALUES (?, ?, ?)")
            .bind(new_project.user_id)
            .bind(&new_project.name)
            .bind(now())
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create project '{}'", new_project.name))?
            .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created project"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Project>> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get project by id")
    }

    /// Project `id` if it is owned by `user_id`
    #[inline]
    pub async fn get_for_user(pool: &SqlitePool, user_id: i64, id: i64) -> Result<Option<Project>> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND user_id = ?");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get project for user")
    }

    #[inline]
    pub async fn get_by_name(pool: &SqlitePool, user_id: i64, name: &str) -> Result<Option<Project>> {
        let query =
            format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = ? AND name = ?");
        sqlx::query_as::<_, Project>(&query)
            .bind(user_id)
            .bind(name)
            .fetch_optional(pool)
            .await
            .context("Failed to get project by name")
    }

    #[inline]
    pub async fn list_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Project>> {
        let query =
            format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = ? ORDER BY name ASC");
        sqlx::query_as::<_, Project>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .context("Failed to list projects")
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete project")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a document row under a caller-chosen id
    ///
    /// Fails with a unique violation when the id is already taken.
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        id: &str,
        new_document: &NewDocument,
    ) -> std::result::Result<Document, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, user_id, file_name, kind, size_bytes, processed, uploaded_date)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(id)
        .bind(new_document.project_id)
        .bind(new_document.user_id)
        .bind(&new_document.file_name)
        .bind(new_document.kind.extension())
        .bind(new_document.size_bytes)
        .bind(now())
        .execute(pool)
        .await?;

        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
        sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
        sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")
    }

    #[inline]
    pub async fn list_for_project(
        pool: &SqlitePool,
        project_id: i64,
        user_id: i64,
    ) -> Result<Vec<Document>> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE project_id = ? AND user_id = ? \
             ORDER BY uploaded_date ASC, id ASC"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(project_id)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .context("Failed to list documents")
    }

    #[inline]
    pub async fn list_unprocessed(
        pool: &SqlitePool,
        project_id: i64,
        user_id: i64,
    ) -> Result<Vec<Document>> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE project_id = ? AND user_id = ? AND processed = 0 \
             ORDER BY uploaded_date ASC, id ASC"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(project_id)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .context("Failed to list unprocessed documents")
    }

    /// Set the flag of every listed document in one transaction
    #[inline]
    pub async fn set_processed(pool: &SqlitePool, ids: &[String], processed: bool) -> Result<u64> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for processed flags")?;

        let mut updated = 0;
        for id in ids {
            updated += sqlx::query("UPDATE documents SET processed = ? WHERE id = ?")
                .bind(processed)
                .bind(id)
                .execute(&mut *transaction)
                .await
                .with_context(|| format!("Failed to update processed flag of {id}"))?
                .rows_affected();
        }

        transaction
            .commit()
            .await
            .context("Failed to commit processed flags")?;

        debug!("Set processed={} on {} documents", processed, updated);
        Ok(updated)
    }

    /// Put saved flags back exactly as they were
    #[inline]
    pub async fn restore_flags(pool: &SqlitePool, flags: &[DocumentFlag]) -> Result<u64> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for flag restore")?;

        let mut restored = 0;
        for flag in flags {
            restored += sqlx::query("UPDATE documents SET processed = ? WHERE id = ?")
                .bind(flag.processed)
                .bind(&flag.id)
                .execute(&mut *transaction)
                .await
                .with_context(|| format!("Failed to restore processed flag of {}", flag.id))?
                .rows_affected();
        }

        transaction
            .commit()
            .await
            .context("Failed to commit flag restore")?;

        debug!("Restored processed flags of {} documents", restored);
        Ok(restored)
    }

    /// After a successful build: processed iff the document is in `contributed`
    #[inline]
    pub async fn commit_processed(
        pool: &SqlitePool,
        project_id: i64,
        user_id: i64,
        contributed: &HashSet<String>,
    ) -> Result<()> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for processed commit")?;

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE project_id = ? AND user_id = ?")
                .bind(project_id)
                .bind(user_id)
                .fetch_all(&mut *transaction)
                .await
                .context("Failed to list project documents")?;

        for id in ids {
            sqlx::query("UPDATE documents SET processed = ? WHERE id = ?")
                .bind(contributed.contains(&id))
                .bind(&id)
                .execute(&mut *transaction)
                .await
                .with_context(|| format!("Failed to commit processed flag of {id}"))?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit processed flags")?;

        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
}

pub struct JobQueries;

impl JobQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, id: &str, project_id: i64, user_id: i64) -> Result<Job> {
        sqlx::query(
            "INSERT INTO jobs (id, project_id, user_id, status, created_date) \
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(id)
        .bind(project_id)
        .bind(user_id)
        .bind(now())
        .execute(pool)
        .await
        .context("Failed to create job")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created job"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get job by id")
    }

    /// Oldest job of `project_id` still waiting to run
    #[inline]
    pub async fn find_pending_for_project(pool: &SqlitePool, project_id: i64) -> Result<Option<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE project_id = ? AND status = 'pending' \
             ORDER BY created_date ASC, rowid ASC LIMIT 1"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(project_id)
            .fetch_optional(pool)
            .await
            .context("Failed to find pending job")
    }

    #[inline]
    pub async fn list_for_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE project_id = ? \
             ORDER BY created_date DESC, rowid DESC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
            .context("Failed to list jobs")
    }

    /// Move the oldest claimable pending job to `running`
    ///
    /// A job is claimable when no other job of the same project is running.
    /// Selection and update happen in a single statement so two workers can
    /// never claim jobs of the same project.
    #[inline]
    pub async fn claim_next(pool: &SqlitePool) -> Result<Option<Job>> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, started_date = ?,
                heartbeat_date = ?, error_message = NULL
            WHERE id = (
                SELECT pending.id FROM jobs AS pending
                WHERE pending.status = 'pending'
                  AND NOT EXISTS (
                      SELECT 1 FROM jobs AS running
                      WHERE running.project_id = pending.project_id AND running.status = 'running'
                  )
                ORDER BY pending.created_date ASC, pending.rowid ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let claimed_at = now();
        sqlx::query_as::<_, Job>(&query)
            .bind(claimed_at)
            .bind(claimed_at)
            .fetch_optional(pool)
            .await
            .context("Failed to claim next job")
    }

    /// Record that the worker running job `id` is alive
    ///
    /// Returns `false` when the job is no longer running.
    #[inline]
    pub async fn heartbeat(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE jobs SET heartbeat_date = ? WHERE id = ? AND status = 'running'")
                .bind(now())
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to update job heartbeat")?;

        Ok(result.rows_affected() > 0)
    }

    /// Finish a running job; `false` when the job was no longer running
    #[inline]
    pub async fn mark_succeeded(pool: &SqlitePool, id: &str, result_message: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'succeeded', result_message = ?, error_message = NULL, \
             finished_date = ? WHERE id = ? AND status = 'running'",
        )
        .bind(result_message)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark job succeeded")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail a running job; `false` when the job was no longer running
    #[inline]
    pub async fn mark_failed(pool: &SqlitePool, id: &str, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?, finished_date = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(error_message)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark job failed")?;

        Ok(result.rows_affected() > 0)
    }

    /// Put a running job back in the queue, keeping the error for inspection
    #[inline]
    pub async fn requeue(pool: &SqlitePool, id: &str, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', error_message = ?, started_date = NULL, \
             heartbeat_date = NULL WHERE id = ? AND status = 'running'",
        )
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to requeue job")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every running job whose last heartbeat is older than `cutoff`
    #[inline]
    pub async fn fail_stale(pool: &SqlitePool, cutoff: NaiveDateTime, message: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?, finished_date = ? \
             WHERE status = 'running' AND COALESCE(heartbeat_date, started_date) < ?",
        )
        .bind(message)
        .bind(now())
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to fail stale jobs")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn stats(pool: &SqlitePool) -> Result<JobStats> {
        let rows: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(pool)
                .await
                .context("Failed to count jobs")?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Running => stats.running = count,
                JobStatus::Succeeded => stats.succeeded = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}
