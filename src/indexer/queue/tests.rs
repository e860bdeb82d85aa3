use super::*;
use crate::config::Config;
use crate::database::sqlite::models::{JobStatus, Project};
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::index::IndexStore;
use crate::pipeline::PipelineConfig;
use tempfile::TempDir;

struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_id(&self) -> &str {
        "broken/model"
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Err(PipelineError::embedding("model crashed"))
    }
}

/// Takes longer than the processing timeout used by the heartbeat tests
struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl Embedder for SlowEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, PipelineError> {
        std::thread::sleep(self.delay);
        self.inner.embed_batch(texts)
    }
}

async fn create_test_setup() -> Result<(TempDir, Config, Database, Project)> {
    let temp_dir = TempDir::new()?;
    let config = Config::load(temp_dir.path())?;
    let database = Database::initialize_from_config(&config).await?;
    let project = database.create_project(1, "notes").await?;
    Ok((temp_dir, config, database, project))
}

fn worker(config: &Config, database: &Database, embedder: Arc<dyn Embedder>) -> JobWorker {
    worker_with(config, database, embedder, test_queue_config())
}

fn worker_with(
    config: &Config,
    database: &Database,
    embedder: Arc<dyn Embedder>,
    queue_config: QueueConfig,
) -> JobWorker {
    let processor = ProjectProcessor::new(
        database.clone(),
        IndexStore::new(config.indexes_dir()),
        embedder,
        PipelineConfig::default(),
    );
    JobWorker::new(
        JobQueue::new(database.clone(), queue_config),
        Arc::new(processor),
    )
}

fn test_queue_config() -> QueueConfig {
    QueueConfig {
        max_attempts: 2,
        processing_timeout_seconds: 60,
        poll_interval_ms: 10,
        heartbeat_interval_ms: 50,
    }
}

#[test]
fn default_queue_config() {
    let config = QueueConfig::default();
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.processing_timeout(), Duration::from_secs(1800));
    assert_eq!(config.poll_interval(), Duration::from_millis(1000));
    assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
}

#[tokio::test]
async fn submit_returns_pending_job() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(database, test_queue_config());

    let job = queue.submit(project.id, 1).await?;

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.project_id, project.id);
    assert!(Uuid::parse_str(&job.id).is_ok());
    assert_eq!(queue.status(&job.id).await?, Some(job));
    Ok(())
}

#[tokio::test]
async fn submit_reuses_pending_job_of_project() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(database, test_queue_config());

    let first = queue.submit(project.id, 1).await?;
    let second = queue.submit(project.id, 1).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(queue.stats().await?.pending, 1);
    Ok(())
}

#[tokio::test]
async fn submit_for_foreign_project_fails() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(database, test_queue_config());

    assert!(queue.submit(project.id, 2).await.is_err());
    assert!(queue.status("missing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn worker_runs_job_to_success() -> Result<()> {
    let (_temp_dir, config, database, project) = create_test_setup().await?;
    database
        .store_document(&project, "a.txt", b"Some text to index.")
        .await?;
    let worker = worker(
        &config,
        &database,
        Arc::new(HashingEmbedder::new("hashing/test-64", 64)?),
    );
    let job = worker.queue.submit(project.id, 1).await?;

    let finished = worker.run_once().await?.expect("a job should run");

    assert_eq!(finished.id, job.id);
    assert_eq!(finished.status, JobStatus::Succeeded);
    assert!(finished
        .result_message
        .as_deref()
        .is_some_and(|message| message.starts_with("Indexed 1 of 1 documents")));
    assert!(worker.run_once().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn no_data_job_succeeds_with_message() -> Result<()> {
    let (_temp_dir, config, database, project) = create_test_setup().await?;
    let worker = worker(
        &config,
        &database,
        Arc::new(HashingEmbedder::new("hashing/test-64", 64)?),
    );
    worker.queue.submit(project.id, 1).await?;

    let finished = worker.run_once().await?.expect("a job should run");

    assert_eq!(finished.status, JobStatus::Succeeded);
    assert_eq!(
        finished.result_message.as_deref(),
        Some("Nothing to process: no supported documents found")
    );
    Ok(())
}

#[tokio::test]
async fn pipeline_failure_fails_job_without_retry() -> Result<()> {
    let (_temp_dir, config, database, project) = create_test_setup().await?;
    database
        .store_document(&project, "a.txt", b"Some text to index.")
        .await?;
    let worker = worker(&config, &database, Arc::new(BrokenEmbedder));
    worker.queue.submit(project.id, 1).await?;

    let finished = worker.run_once().await?.expect("a job should run");

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.attempts, 1);
    assert!(finished
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("model crashed")));
    assert!(database
        .list_documents(project.id, 1)
        .await?
        .iter()
        .all(|document| !document.processed));
    Ok(())
}

#[tokio::test]
async fn worker_drains_queue_and_keeps_going_after_failure() -> Result<()> {
    let (_temp_dir, config, database, project) = create_test_setup().await?;
    let other = database.create_project(1, "other").await?;
    database.store_document(&project, "a.txt", b"Text.").await?;
    database.store_document(&other, "b.txt", b"More text.").await?;
    let worker = worker(&config, &database, Arc::new(BrokenEmbedder));
    worker.queue.submit(project.id, 1).await?;
    worker.queue.submit(other.id, 1).await?;

    let processed = worker.run_until_idle().await?;

    assert_eq!(processed, 2);
    assert_eq!(worker.queue.stats().await?.failed, 2);
    Ok(())
}

#[tokio::test]
async fn retryable_failure_is_requeued_until_attempts_run_out() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(database, test_queue_config());
    let job = queue.submit(project.id, 1).await?;

    let claimed = queue.claim().await?.expect("job should be claimable");
    queue.fail(&claimed, "database is locked", true).await?;
    assert_eq!(
        queue.status(&job.id).await?.map(|job| job.status),
        Some(JobStatus::Pending)
    );

    let claimed = queue.claim().await?.expect("job should be claimable again");
    assert_eq!(claimed.attempts, 2);
    queue.fail(&claimed, "database is locked", true).await?;

    let finished = queue.wait_for(&job.id).await?;
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.error_message.as_deref(), Some("database is locked"));
    Ok(())
}

#[tokio::test]
async fn stale_running_job_is_failed_on_claim() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(
        database,
        QueueConfig {
            processing_timeout_seconds: 0,
            ..test_queue_config()
        },
    );
    let job = queue.submit(project.id, 1).await?;
    queue.claim().await?.expect("job should be claimable");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(queue.claim().await?.is_none());

    let finished = queue.status(&job.id).await?.expect("job should exist");
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("timed out")));
    Ok(())
}

#[tokio::test]
async fn result_of_stale_job_is_dropped() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(
        database,
        QueueConfig {
            processing_timeout_seconds: 0,
            ..test_queue_config()
        },
    );
    queue.submit(project.id, 1).await?;
    let first = queue.claim().await?.expect("job should be claimable");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = queue.submit(project.id, 1).await?;

    let claimed = queue.claim().await?.expect("second job should be claimable");
    assert_eq!(claimed.id, second.id);

    assert!(!queue.complete(&first, "Indexed 1 of 1 documents").await?);
    assert!(!queue.fail(&first, "database is locked", true).await?);
    let stale = queue.status(&first.id).await?.expect("job should exist");
    assert_eq!(stale.status, JobStatus::Failed);
    assert_eq!(stale.result_message, None);
    assert_eq!(
        queue.status(&second.id).await?.map(|job| job.status),
        Some(JobStatus::Running)
    );
    Ok(())
}

#[tokio::test]
async fn heartbeat_keeps_long_job_claimed() -> Result<()> {
    let (_temp_dir, _config, database, project) = create_test_setup().await?;
    let queue = JobQueue::new(
        database,
        QueueConfig {
            processing_timeout_seconds: 1,
            ..test_queue_config()
        },
    );
    queue.submit(project.id, 1).await?;
    let first = queue.claim().await?.expect("job should be claimable");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(queue.heartbeat(&first).await?);
    tokio::time::sleep(Duration::from_millis(600)).await;
    let second = queue.submit(project.id, 1).await?;

    assert!(queue.claim().await?.is_none());
    assert_eq!(
        queue.status(&first.id).await?.map(|job| job.status),
        Some(JobStatus::Running)
    );

    assert!(queue.complete(&first, "Indexed 1 of 1 documents").await?);
    let claimed = queue.claim().await?.expect("second job should be claimable");
    assert_eq!(claimed.id, second.id);
    Ok(())
}

#[tokio::test]
async fn worker_heartbeat_outlives_processing_timeout() -> Result<()> {
    let (_temp_dir, config, database, project) = create_test_setup().await?;
    database
        .store_document(&project, "a.txt", b"Some text to index.")
        .await?;
    let worker = worker_with(
        &config,
        &database,
        Arc::new(SlowEmbedder {
            inner: HashingEmbedder::new("hashing/test-64", 64)?,
            delay: Duration::from_millis(1500),
        }),
        QueueConfig {
            processing_timeout_seconds: 1,
            heartbeat_interval_ms: 100,
            ..test_queue_config()
        },
    );
    let job = worker.queue.submit(project.id, 1).await?;

    let (finished, claimed_meanwhile) = tokio::join!(worker.run_once(), async {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        worker.queue.submit(project.id, 1).await?;
        worker.queue.claim().await
    });

    assert!(claimed_meanwhile?.is_none());
    let finished = finished?.expect("a job should run");
    assert_eq!(finished.id, job.id);
    assert_eq!(finished.status, JobStatus::Succeeded);
    assert_eq!(worker.queue.stats().await?.pending, 1);
    Ok(())
}

#[test]
fn only_non_pipeline_errors_are_retryable() {
    assert!(is_retryable(&anyhow!("disk full")));
    assert!(is_retryable(&anyhow::Error::from(PipelineError::index_write(
        "disk full"
    ))));
    assert!(!is_retryable(&anyhow::Error::from(PipelineError::embedding(
        "bad input"
    ))));
}
