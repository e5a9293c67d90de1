//! Remote embedding provider speaking the OpenAI-compatible API

use crate::config::ProviderConfig;
use crate::embedding::EmbeddingBackend;
use crate::error::{DependencyError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Client for any `/v1/embeddings` endpoint (OpenAI, Azure, Together, ...)
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseData {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl RemoteEmbeddingProvider {
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
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingProvider {
    fn name(&self) -> &str {
        "remote"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.api_url();
        debug!("Embedding {} texts via {}", texts.len(), url);

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = timeout(Duration::from_millis(self.config.timeout_ms), builder.send())
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

        let mut parsed: EmbeddingResponseData = response
            .json()
            .await
            .map_err(|e| DependencyError::EmbeddingUnavailable(e.to_string()))?;

        // The wire format carries an index per vector; honor it
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_api_url() {
        let provider = RemoteEmbeddingProvider::new(ProviderConfig {
            kind: ProviderKind::Remote,
            model: "text-embedding-3-small".to_string(),
            endpoint: Some("https://embeddings.example.com/".to_string()),
            api_key: Some("sk-test".to_string()),
            timeout_ms: 5_000,
        });
        assert_eq!(
            provider.api_url(),
            "https://embeddings.example.com/v1/embeddings"
        );
    }
}
