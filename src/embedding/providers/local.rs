//! Local embedding provider speaking the Ollama API

use crate::config::ProviderConfig;
use crate::embedding::EmbeddingBackend;
use crate::error::{DependencyError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Ollama embedding client
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn api_url(&self) -> String {
        let base = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        format!("{}/api/embeddings", base)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.api_url();
        debug!("Embedding {} texts via {}", texts.len(), url);

        // The Ollama embeddings endpoint takes one prompt per call
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let request = OllamaEmbedRequest {
                model: &self.config.model,
                prompt: text,
            };

            let response = timeout(
                Duration::from_millis(self.config.timeout_ms),
                self.client.post(&url).json(&request).send(),
            )
            .await
            .map_err(|_| DependencyError::Timeout)?
            .map_err(|e| DependencyError::EmbeddingUnavailable(e.to_string()))?;

            if !response.status().is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(DependencyError::EmbeddingUnavailable(error_text).into());
            }

            let parsed: OllamaEmbedResponse = response
                .json()
                .await
                .map_err(|e| DependencyError::EmbeddingUnavailable(e.to_string()))?;

            vectors.push(parsed.embedding);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::Local,
            model: "nomic-embed-text".to_string(),
            endpoint: None,
            api_key: None,
            timeout_ms: 5_000,
        }
    }

    #[test]
    fn test_api_url_default_endpoint() {
        let provider = OllamaEmbeddingProvider::new(test_config());
        assert_eq!(provider.api_url(), "http://localhost:11434/api/embeddings");
    }

    #[test]
    fn test_api_url_custom_endpoint() {
        let mut config = test_config();
        config.endpoint = Some("http://gpu-box:11434/".to_string());
        let provider = OllamaEmbeddingProvider::new(config);
        assert_eq!(provider.api_url(), "http://gpu-box:11434/api/embeddings");
    }
}
