//! Embedding provider wire-format tests against mocked endpoints

use serde_json::json;
use std::sync::Arc;
use tenderlens::config::{ProviderConfig, ProviderKind, RetryConfig};
use tenderlens::embedding::providers::{OllamaEmbeddingProvider, RemoteEmbeddingProvider};
use tenderlens::embedding::EmbeddingRouter;
use tenderlens::EmbeddingBackend;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn local_config(endpoint: String) -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::Local,
        model: "nomic-embed-text".to_string(),
        endpoint: Some(endpoint),
        api_key: None,
        timeout_ms: 2_000,
    }
}

fn remote_config(endpoint: String) -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::Remote,
        model: "text-embedding-3-small".to_string(),
        endpoint: Some(endpoint),
        api_key: Some("sk-test-key".to_string()),
        timeout_ms: 2_000,
    }
}

/// Responds to Ollama embed calls with a vector derived from the prompt
struct OllamaResponder;

impl Respond for OllamaResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let prompt = body["prompt"].as_str().unwrap_or_default();
        let seed = prompt.len() as f32;
        ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [seed, 1.0, 0.5, 0.25]
        }))
    }
}

#[tokio::test]
async fn test_ollama_provider_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(OllamaResponder)
        .expect(2)
        .mount(&server)
        .await;

    let provider = OllamaEmbeddingProvider::new(local_config(server.uri()));
    let vectors = provider
        .embed(&["ab".to_string(), "abcd".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0][0], 2.0);
    assert_eq!(vectors[1][0], 4.0);
}

#[tokio::test]
async fn test_remote_provider_sorts_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "text-embedding-3-small",
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        })))
        .mount(&server)
        .await;

    let provider = RemoteEmbeddingProvider::new(remote_config(server.uri()));
    let vectors = provider
        .embed(&["primero".to_string(), "segundo".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors[0], vec![1.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0]);
}

#[tokio::test]
async fn test_router_falls_back_from_broken_remote() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&broken)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(OllamaResponder)
        .mount(&healthy)
        .await;

    let backends: Vec<Arc<dyn EmbeddingBackend>> = vec![
        Arc::new(RemoteEmbeddingProvider::new(remote_config(broken.uri()))),
        Arc::new(OllamaEmbeddingProvider::new(local_config(healthy.uri()))),
    ];
    let router = EmbeddingRouter::from_backends(
        backends,
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        },
    );

    let batch = router.embed(&["texto".to_string()]).await.unwrap();
    assert_eq!(batch.provider, "local");
    assert_eq!(batch.dimension, 4);

    // L2 normalization happened at the router
    let norm: f32 = batch.vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_router_errors_when_everything_is_down() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let backends: Vec<Arc<dyn EmbeddingBackend>> =
        vec![Arc::new(RemoteEmbeddingProvider::new(remote_config(broken.uri())))];
    let router = EmbeddingRouter::from_backends(
        backends,
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        },
    );

    let err = router.embed(&["texto".to_string()]).await.unwrap_err();
    assert_eq!(err.code(), "embedding_unavailable");
}
