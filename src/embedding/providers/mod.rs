//! Embedding provider implementations

pub mod local;
pub mod remote;

pub use local::OllamaEmbeddingProvider;
pub use remote::RemoteEmbeddingProvider;

use crate::config::{ProviderConfig, ProviderKind};
use crate::embedding::EmbeddingBackend;
use std::sync::Arc;

/// Build a backend from a provider entry
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn EmbeddingBackend> {
    match config.kind {
        ProviderKind::Local => Arc::new(OllamaEmbeddingProvider::new(config.clone())),
        ProviderKind::Remote => Arc::new(RemoteEmbeddingProvider::new(config.clone())),
    }
}
