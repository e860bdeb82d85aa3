#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use docvault::config::OllamaConfig;
use docvault::embeddings::ollama::OllamaClient;
use docvault::embeddings::{ChunkingConfig, Embedder, chunk_units, embed_texts};
use docvault::http::RetryPolicy;
use docvault::index::IndexPair;
use docvault::loader::{Provenance, TextUnit};
use docvault::query::query;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const TEST_MODEL: &str = "nomic-embed-text:latest";
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn create_integration_test_client() -> OllamaClient {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());

    let config = OllamaConfig {
        host,
        port,
        ..OllamaConfig::default()
    };

    OllamaClient::new(&config, &model)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_policy(RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
        })
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn unit(source: &str, text: &str) -> TextUnit {
    TextUnit {
        text: text.to_string(),
        provenance: Provenance::for_file(Path::new(source)),
    }
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();

    info!("Testing health check against {}", client.base_url());
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_list_models() {
    init_test_tracing();

    let models = create_integration_test_client()
        .list_models()
        .expect("model listing should succeed");

    assert!(!models.is_empty(), "Should have at least one model available");
    for model in &models {
        debug!("Available model: {} (size: {:?})", model.name, model.size);
    }
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_batch_embeddings_share_dimension() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts = [
        "Rust guarantees memory safety without a garbage collector.",
        "Sourdough bread needs a long fermentation.",
        "SQLite stores a whole database in one file.",
    ];

    let embeddings = client
        .embed_batch(&texts)
        .expect("batch embedding should succeed");

    assert_eq!(embeddings.len(), texts.len());
    let dimension = embeddings[0].len();
    assert!(dimension > 0);
    assert!(embeddings.iter().all(|e| e.len() == dimension));
    info!("Generated {} embeddings of dimension {}", embeddings.len(), dimension);
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_index_and_query() {
    init_test_tracing();

    let client = create_integration_test_client();
    let units = vec![
        unit("rust.txt", "The borrow checker enforces ownership rules at compile time."),
        unit("bread.txt", "Knead the dough, then let it proof overnight in the fridge."),
        unit("garden.txt", "Tomato plants need full sun and deep, regular watering."),
    ];
    let chunks = chunk_units(&units, &ChunkingConfig::default()).expect("should chunk");
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let vectors = embed_texts(&client, &texts, 2).expect("should embed");
    let pair = IndexPair::build(client.model_id(), &vectors, chunks).expect("should build");

    let matches = query("how do I bake bread", &pair, &client, 1).expect("should query");

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].provenance.source, "bread.txt");
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_unknown_model_fails_health_check() {
    init_test_tracing();

    let config = OllamaConfig::default();
    let client = OllamaClient::new(&config, "definitely-not-a-model:latest")
        .expect("should create client");

    assert!(client.health_check().is_err());
}
