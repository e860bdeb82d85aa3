use super::*;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [embedding
            backend = "fastembed"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn partial_config_with_defaults() {
        let partial_toml = r#"
            [embedding]
            backend = "ollama"
            model = "nomic-embed-text:latest"

            [embedding.ollama]
            host = "gpu-box"
        "#;

        let config: Config = toml::from_str(partial_toml).expect("should parse partial toml");
        assert_eq!(config.embedding.backend, EmbeddingBackend::Ollama);
        assert_eq!(config.embedding.ollama.host, "gpu-box");
        assert_eq!(config.embedding.ollama.port, 11434);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.query.default_k, 5);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let toml = r#"
            [embedding]
            backend = "openai"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn init_config_writes_defaults_once() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let base_dir = temp_dir.path().join("docvault");

        let config = init_config(&base_dir).expect("should write defaults");
        assert!(config.config_file_path().exists());

        std::fs::write(
            config.config_file_path(),
            "[query]\ndefault_k = 9\n",
        )
        .expect("should overwrite config file");

        let again = init_config(&base_dir).expect("should keep existing config");
        assert_eq!(again.query.default_k, 9);
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let ollama = OllamaConfig {
                protocol: protocol.to_string(),
                host: host.to_string(),
                port,
                ..OllamaConfig::default()
            };

            let url = ollama.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::OverlapTooLarge(300, 200),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(message.len() > 10);
        }
    }
}
