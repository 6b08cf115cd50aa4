use super::*;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

fn config_for(server: &MockServer) -> OllamaConfig {
    let address = server.address();
    OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        embedding_model: "test-embed".to_string(),
        batch_size: 2,
        ..OllamaConfig::default()
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        embedding_model: "test-model".to_string(),
        batch_size: 128,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.name(), "ollama:test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5)
        .with_backoff_base(Duration::from_millis(5));

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.backoff_base_ms, 5);
}

#[test]
fn empty_input_makes_no_request() {
    let client = OllamaClient::new(&OllamaConfig::default()).expect("Failed to create client");
    let embeddings = client.embed(&[]).expect("empty input should succeed");
    assert!(embeddings.is_empty());
}

#[tokio::test]
async fn embeds_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["alpha", "beta"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["gamma"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.5]]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let embeddings = tokio::task::spawn_blocking(move || client.embed(&texts(&["alpha", "beta", "gamma"])))
        .await
        .expect("task should not panic")
        .expect("embedding should succeed");

    assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
}

#[tokio::test]
async fn count_mismatch_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0]]})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let err = tokio::task::spawn_blocking(move || client.embed(&texts(&["one", "two"])))
        .await
        .expect("task should not panic")
        .expect_err("mismatched response should fail");

    assert!(matches!(
        err,
        EmbeddingError::CountMismatch {
            expected: 2,
            actual: 1
        }
    ));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.25, 0.75]]})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("Failed to create client")
        .with_backoff_base(Duration::from_millis(1));
    let embeddings = tokio::task::spawn_blocking(move || client.embed(&texts(&["retry me"])))
        .await
        .expect("task should not panic")
        .expect("second attempt should succeed");

    assert_eq!(embeddings, vec![vec![0.25, 0.75]]);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let err = tokio::task::spawn_blocking(move || client.embed(&texts(&["missing model"])))
        .await
        .expect("task should not panic")
        .expect_err("404 should fail");

    match err {
        EmbeddingError::Provider { provider, message } => {
            assert_eq!(provider, "ollama:test-embed");
            assert!(message.contains("404"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn health_check_requires_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "other-model", "size": 1}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should not panic");

    assert!(result.is_err());
}
