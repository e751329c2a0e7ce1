//! Configuration loading from TOML files and strings

use focus_context::config::{CompressorBackend, Config, DropPolicy, EmbeddingBackend};
use focus_context::ContextError;
use secrecy::ExposeSecret;

#[test]
fn test_empty_document_uses_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.packer.relevance_weight, 0.6);
    assert_eq!(config.packer.recency_weight, 0.4);
    assert_eq!(config.packer.drop_policy, DropPolicy::ContinueScanning);
    assert_eq!(config.compressor.backend, CompressorBackend::Heuristic);
    assert_eq!(config.embedding.backend, EmbeddingBackend::Hashing);
    assert_eq!(config.embedding.dimension, 512);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_sections_override_defaults() {
    let config = Config::from_toml_str(
        r#"
        [packer]
        relevance_weight = 0.7
        recency_weight = 0.3
        stub_format = "[ref #{position} {role}]"
        placeholder_preview_tokens = 8
        drop_policy = "stop_at_first_drop"

        [compressor]
        backend = "llm"
        api_key = "sk-test"
        model = "gpt-4o-mini"

        [logging]
        level = "debug"
        json = true
        "#,
    )
    .unwrap();

    assert_eq!(config.packer.relevance_weight, 0.7);
    assert_eq!(config.packer.drop_policy, DropPolicy::StopAtFirstDrop);
    assert_eq!(config.packer.placeholder_preview_tokens, 8);
    assert_eq!(config.compressor.backend, CompressorBackend::Llm);
    assert_eq!(
        config.compressor.api_key.as_ref().map(|k| k.expose_secret().as_str()),
        Some("sk-test")
    );
    assert!(config.logging.json);
}

#[test]
fn test_api_key_is_redacted_in_debug_output() {
    let config = Config::from_toml_str(
        r#"
        [embedding]
        backend = "openai"
        api_key = "sk-very-secret"
        "#,
    )
    .unwrap();
    assert!(!format!("{:?}", config).contains("sk-very-secret"));
}

#[test]
fn test_invalid_weights_rejected() {
    let err = Config::from_toml_str(
        r#"
        [packer]
        relevance_weight = 0.0
        recency_weight = 0.0
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, ContextError::Configuration(_)));
}

#[test]
fn test_remote_backend_without_key_rejected() {
    let err = Config::from_toml_str(
        r#"
        [embedding]
        backend = "openai"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, ContextError::Configuration(_)));
}

#[test]
fn test_from_file() {
    let path = std::env::temp_dir().join(format!("focus-context-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
        [packer]
        compress_ratio = 0.5
        min_compress_tokens = 10
        "#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.packer.compress_ratio, 0.5);
    assert_eq!(config.packer.min_compress_tokens, 10);
}
