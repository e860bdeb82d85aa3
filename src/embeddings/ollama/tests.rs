use super::*;
use crate::embeddings::embed_texts;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

fn config_for(server: &MockServer) -> OllamaConfig {
    let url = Url::parse(&server.uri()).expect("mock server uri should parse");
    OllamaConfig {
        protocol: url.scheme().to_string(),
        host: url.host_str().unwrap_or("127.0.0.1").to_string(),
        port: url.port().unwrap_or(80),
        timeout_seconds: 5,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        initial_delay: Duration::from_millis(5),
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        timeout_seconds: 10,
    };
    let client = OllamaClient::new(&config, "test-model").expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.model_id(), "ollama/test-model");
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry, RetryPolicy::default());
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default(), "model")
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_policy(fast_retry());

    assert_eq!(client.retry.attempts, 3);
}

#[tokio::test]
async fn batch_embedding_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({
            "model": "all-minilm",
            "input": ["first", "second"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "all-minilm",
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server), "all-minilm")
        .expect("should create client")
        .with_retry_policy(fast_retry());

    let vectors = client
        .embed_batch(&["first", "second"])
        .expect("embedding should succeed");

    assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0]],
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server), "all-minilm")
        .expect("should create client")
        .with_retry_policy(fast_retry());

    let vectors = client.embed_batch(&["only"]).expect("third attempt should succeed");
    assert_eq!(vectors, vec![vec![1.0, 0.0]]);
}

#[tokio::test]
async fn count_mismatch_is_an_embedding_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0]],
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server), "all-minilm")
        .expect("should create client")
        .with_retry_policy(fast_retry());

    let result = embed_texts(&client, &["one", "two"], 8);
    assert!(matches!(result, Err(PipelineError::Embedding { .. })));
}

#[tokio::test]
async fn missing_model_fails_health_check() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "nomic-embed-text:latest" }],
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server), "all-minilm")
        .expect("should create client")
        .with_retry_policy(fast_retry());

    let error = client.health_check().expect_err("health check should fail");
    assert!(error.to_string().contains("all-minilm"));

    let models = client.list_models().expect("should list models");
    assert_eq!(models.len(), 1);
}
