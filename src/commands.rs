use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, get_config_dir};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{Job, JobStatus};
use crate::embeddings::ModelRegistry;
use crate::errors::PipelineError;
use crate::fetch::fetch_into_project;
use crate::indexer::{JobQueue, JobWorker, ProjectProcessor};
use crate::query::QueryMatch;

/// Loaded configuration plus an open metadata database
#[derive(Debug, Clone)]
pub struct App {
    pub config: Config,
    pub database: Database,
}

impl App {
    /// Open the data directory, defaulting to the configured one
    #[inline]
    pub async fn open(base_dir: Option<&Path>) -> Result<Self> {
        let base_dir = match base_dir {
            Some(dir) => dir.to_path_buf(),
            None => get_config_dir()?,
        };
        let config = Config::load(&base_dir)?;
        let database = Database::initialize_from_config(&config)
            .await
            .context("Failed to initialize database")?;
        Ok(Self { config, database })
    }

    #[inline]
    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.database.clone(), self.config.queue.clone())
    }

    #[inline]
    pub async fn processor(&self) -> Result<ProjectProcessor> {
        ProjectProcessor::from_config(&self.config, self.database.clone()).await
    }
}

/// Create a project for `user_id`
#[inline]
pub async fn create_project(app: &App, user_id: i64, name: &str) -> Result<()> {
    let project = app.database.create_project(user_id, name).await?;
    println!("Created project: {} (ID: {})", project.name, project.id);
    Ok(())
}

#[inline]
pub async fn list_projects(app: &App, user_id: i64) -> Result<()> {
    let projects = app.database.list_projects(user_id).await?;
    if projects.is_empty() {
        println!("No projects yet.");
        println!("Use 'docvault project create <name>' to add one.");
        return Ok(());
    }

    println!("Projects ({} total):", projects.len());
    for project in &projects {
        let documents = app.database.list_documents(project.id, user_id).await?;
        let processed = documents.iter().filter(|d| d.processed).count();
        println!(
            "  {} (ID: {}) - {} documents, {} processed, created {}",
            project.name,
            project.id,
            documents.len(),
            processed,
            project.created_date.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Copy local files into a project; bad files are reported and skipped
#[inline]
pub async fn upload(app: &App, user_id: i64, project_id: i64, paths: &[PathBuf]) -> Result<()> {
    let project = app.database.require_project(user_id, project_id).await?;

    let mut stored = 0;
    for path in paths {
        match app.database.upload_document(&project, path).await {
            Ok(document) => {
                stored += 1;
                println!("  {} {} -> {}", style("✓").green(), path.display(), document.id);
            }
            Err(e) => {
                warn!("Upload of {} failed: {:#}", path.display(), e);
                println!("  {} {}: {:#}", style("✗").red(), path.display(), e);
            }
        }
    }

    println!(
        "Uploaded {} of {} files to {}",
        stored,
        paths.len(),
        project.name
    );
    Ok(())
}

#[inline]
pub async fn fetch_page(app: &App, user_id: i64, project_id: i64, url: &str) -> Result<()> {
    let project = app.database.require_project(user_id, project_id).await?;
    let document = fetch_into_project(&app.database, &project, url, &app.config.fetch).await?;
    println!(
        "Stored {} as {} ({} bytes) in {}",
        url, document.id, document.size_bytes, project.name
    );
    Ok(())
}

#[inline]
pub async fn list_documents(app: &App, user_id: i64, project_id: i64) -> Result<()> {
    let project = app.database.require_project(user_id, project_id).await?;
    let documents = app.database.list_documents(project.id, user_id).await?;

    if documents.is_empty() {
        println!("Project {} has no documents.", project.name);
        return Ok(());
    }

    println!("Documents in {} ({} total):", project.name, documents.len());
    for document in &documents {
        let state = if document.processed {
            style("processed").green()
        } else {
            style("pending").yellow()
        };
        println!(
            "  {} {:<40} {:>10} bytes  {}",
            document.id, document.file_name, document.size_bytes, state
        );
    }
    Ok(())
}

/// Queue a build of the project; with `wait`, run it here and report the result
#[inline]
pub async fn process(app: &App, user_id: i64, project_id: i64, wait: bool) -> Result<()> {
    let queue = app.queue();
    let job = queue.submit(project_id, user_id).await?;
    println!("Submitted job {}", job.id);

    if !wait {
        println!("Run 'docvault worker' to process it, 'docvault job {}' to check on it.", job.id);
        return Ok(());
    }

    let worker = JobWorker::new(queue.clone(), Arc::new(app.processor().await?));
    worker.run_until_idle().await?;
    let finished = queue.wait_for(&job.id).await?;
    ModelRegistry::global().shutdown();

    print_job(&finished);
    if finished.status == JobStatus::Failed {
        anyhow::bail!("Job {} failed", finished.id);
    }
    Ok(())
}

/// Run queued jobs; with `once`, stop when the queue is empty
#[inline]
pub async fn run_worker(app: &App, once: bool) -> Result<()> {
    let worker = JobWorker::new(app.queue(), Arc::new(app.processor().await?));

    if once {
        let processed = worker.run_until_idle().await?;
        println!("Processed {processed} jobs");
    } else {
        info!("Worker polling every {}ms", app.config.queue.poll_interval_ms);
        tokio::select! {
            result = worker.run() => result?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutting down worker");
            }
        }
    }

    ModelRegistry::global().shutdown();
    Ok(())
}

#[inline]
pub async fn show_job(app: &App, job_id: &str) -> Result<()> {
    let job = app
        .queue()
        .status(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job not found: {}", job_id))?;
    print_job(&job);
    Ok(())
}

fn print_job(job: &Job) {
    let status = match job.status {
        JobStatus::Succeeded => style(job.status.as_str()).green(),
        JobStatus::Failed => style(job.status.as_str()).red(),
        JobStatus::Pending | JobStatus::Running => style(job.status.as_str()).yellow(),
    };
    println!("Job {}", job.id);
    println!("  Project: {}", job.project_id);
    println!("  Status: {}", status);
    println!("  Attempts: {}", job.attempts);
    println!("  Created: {}", job.created_date.format("%Y-%m-%d %H:%M:%S"));
    if let Some(finished) = job.finished_date {
        println!("  Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(result) = &job.result_message {
        println!("  Result: {}", result);
    }
    if let Some(error) = &job.error_message {
        println!("  Error: {}", style(error).red());
    }
}

/// Print the chunks of a project nearest to `query_text`
#[inline]
pub async fn query(
    app: &App,
    user_id: i64,
    project_id: i64,
    query_text: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let k = k.unwrap_or(app.config.query.default_k);
    let processor = app.processor().await?;

    let matches = match processor
        .answer_query(user_id, project_id, query_text, k)
        .await
    {
        Ok(matches) => matches,
        Err(e) => {
            if let Some(pipeline_error) = e.downcast_ref::<PipelineError>() {
                eprintln!("{}", style(pipeline_error.user_message()).red());
            }
            return Err(e);
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&matches).context("Failed to serialize matches")?
        );
    } else {
        print_matches(&matches);
    }
    Ok(())
}

fn print_matches(matches: &[QueryMatch]) {
    if matches.is_empty() {
        println!("No matches.");
        return;
    }

    for m in matches {
        let mut location = m.provenance.source.clone();
        if let Some(page) = m.provenance.page {
            location = format!("{location} p.{page}");
        }
        if let Some(title) = &m.provenance.title {
            location = format!("{location} ({title})");
        }
        println!(
            "{} {} {}",
            style(format!("#{}", m.rank)).bold(),
            style(location).cyan(),
            style(format!("distance {:.4}", m.distance)).dim()
        );
        println!("{}", m.text.trim());
        println!();
    }
}
