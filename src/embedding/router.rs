//! Embedding Router
//!
//! Drives an ordered list of providers with retry and fallback: the
//! first provider that answers within its budget wins, every vector is
//! L2-normalized, and exhausting all providers is a hard error.

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::embedding::{l2_normalize, providers, EmbeddingBackend, EmbeddingBatch};
use crate::error::{AnalysisError, DependencyError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ordered-fallback front for all embedding traffic
pub struct EmbeddingRouter {
    providers: Vec<Arc<dyn EmbeddingBackend>>,
    retry: RetryConfig,
    batch_size: usize,
}

impl EmbeddingRouter {
    /// Build the router from configuration
    pub fn from_config(embedding: &EmbeddingConfig, retry: RetryConfig) -> Self {
        let providers = embedding.providers.iter().map(providers::build_provider).collect();
        Self {
            providers,
            retry,
            batch_size: embedding.batch_size.max(1),
        }
    }

    /// Build the router from pre-constructed backends (tests)
    pub fn from_backends(backends: Vec<Arc<dyn EmbeddingBackend>>, retry: RetryConfig) -> Self {
        Self {
            providers: backends,
            retry,
            batch_size: 32,
        }
    }

    /// Embed an ordered sequence of texts. Batches are sized by
    /// configuration; order is preserved across batches.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Err(DependencyError::EmbeddingUnavailable(
                "no texts to embed".to_string(),
            )
            .into());
        }

        let mut last_error: Option<AnalysisError> = None;

        for provider in &self.providers {
            match self.try_provider(provider, texts).await {
                Ok(batch) => return Ok(batch),
                Err(e) => {
                    warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(DependencyError::EmbeddingUnavailable(format!(
            "all {} providers exhausted; last error: {}",
            self.providers.len(),
            last_error.map_or("none recorded".to_string(), |e| e.to_string())
        ))
        .into())
    }

    /// One provider, all batches, with exponential backoff per attempt
    async fn try_provider(
        &self,
        provider: &Arc<dyn EmbeddingBackend>,
        texts: &[String],
    ) -> Result<EmbeddingBatch> {
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.base_delay_ms * (1 << (attempt - 1).min(6));
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }

            match self.embed_all_batches(provider, texts).await {
                Ok(batch) => {
                    if attempt > 0 {
                        debug!(
                            "Provider {} recovered after {} retries",
                            provider.name(),
                            attempt
                        );
                    }
                    return Ok(batch);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Attempt {} failed for provider {}: {}",
                        attempt + 1,
                        provider.name(),
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DependencyError::EmbeddingUnavailable("no error recorded".to_string()).into()
        }))
    }

    async fn embed_all_batches(
        &self,
        provider: &Arc<dyn EmbeddingBackend>,
        texts: &[String],
    ) -> Result<EmbeddingBatch> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let batch = provider.embed(chunk).await?;
            if batch.len() != chunk.len() {
                return Err(DependencyError::EmbeddingUnavailable(format!(
                    "provider {} returned {} vectors for {} texts",
                    provider.name(),
                    batch.len(),
                    chunk.len()
                ))
                .into());
            }
            vectors.extend(batch);
        }

        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
            return Err(DependencyError::EmbeddingUnavailable(format!(
                "provider {} returned inconsistent vector dimensions",
                provider.name()
            ))
            .into());
        }

        for vector in vectors.iter_mut() {
            l2_normalize(vector);
        }

        Ok(EmbeddingBatch {
            vectors,
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
            dimension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyBackend {
        name: &'static str,
        fail_first: usize,
        calls: AtomicUsize,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(DependencyError::EmbeddingUnavailable("down".to_string()).into());
            }
            Ok(texts.iter().map(|_| vec![2.0; self.dimension]).collect())
        }
    }

    fn retry_fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider() {
        let broken = Arc::new(FlakyBackend {
            name: "remote",
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
            dimension: 4,
        });
        let healthy = Arc::new(FlakyBackend {
            name: "local",
            fail_first: 0,
            calls: AtomicUsize::new(0),
            dimension: 4,
        });

        let router = EmbeddingRouter::from_backends(vec![broken, healthy], retry_fast());
        let batch = router.embed(&["hola".to_string()]).await.unwrap();
        assert_eq!(batch.provider, "local");
        assert_eq!(batch.dimension, 4);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let flaky = Arc::new(FlakyBackend {
            name: "remote",
            fail_first: 2,
            calls: AtomicUsize::new(0),
            dimension: 4,
        });

        let router = EmbeddingRouter::from_backends(vec![flaky], retry_fast());
        let batch = router.embed(&["hola".to_string()]).await.unwrap();
        assert_eq!(batch.provider, "remote");
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let broken = Arc::new(FlakyBackend {
            name: "remote",
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
            dimension: 4,
        });

        let router = EmbeddingRouter::from_backends(vec![broken], retry_fast());
        let err = router.embed(&["hola".to_string()]).await.unwrap_err();
        assert_eq!(err.code(), "embedding_unavailable");
    }

    #[tokio::test]
    async fn test_vectors_are_normalized() {
        let healthy = Arc::new(FlakyBackend {
            name: "local",
            fail_first: 0,
            calls: AtomicUsize::new(0),
            dimension: 4,
        });

        let router = EmbeddingRouter::from_backends(vec![healthy], retry_fast());
        let batch = router.embed(&["hola".to_string()]).await.unwrap();
        let norm: f32 = batch.vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
