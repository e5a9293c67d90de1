//! Shared read-only analysis context
//!
//! Replaces ad-hoc global caches: the taxonomy, rule tables, indicator
//! banks, embedding router and vector store are loaded once at startup
//! and injected into every stage.

use crate::agents::ruc::ContractorRegistry;
use crate::catalog::Catalog;
use crate::config::AnalysisConfig;
use crate::embedding::{centroid, EmbeddingRouter};
use crate::error::{Result, StageError};
use crate::store::{SqliteVectorStore, VectorItem, VectorStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Collection holding one centroid per taxonomy section
pub const SECTION_SEEDS: &str = "section_seeds";

/// Collection holding one centroid per risk category
pub const RISK_SEEDS: &str = "risk_seeds";

/// Collection holding per-run fragment vectors, ids prefixed by run id
pub const FRAGMENTS: &str = "fragments";

/// Cooperative cancellation flag observed between fragments
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out of a stage if cancellation was requested
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(StageError::Cancelled {
                stage: stage.to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    }
}

/// Read-only context passed to every agent
pub struct AnalysisContext {
    pub config: Arc<AnalysisConfig>,
    pub catalog: Arc<Catalog>,
    pub embedder: Arc<EmbeddingRouter>,
    pub store: Arc<dyn VectorStore>,
    pub registry: Option<Arc<dyn ContractorRegistry>>,
    seeds: OnceCell<()>,
}

impl AnalysisContext {
    /// Initialize the context from configuration: validate, load the
    /// catalog, open the store and build the embedding router
    pub async fn initialize(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::load(&config.catalog)?;
        let embedder = EmbeddingRouter::from_config(&config.embedding, config.retry.clone());
        let store = SqliteVectorStore::open(&config.store_path()).await?;

        info!(
            "Analysis context ready: {} sections, {} risk categories, {} embedding providers",
            catalog.taxonomy.sections.len(),
            catalog.indicators.categories.len(),
            config.embedding.providers.len()
        );

        Ok(Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            embedder: Arc::new(embedder),
            store: Arc::new(store),
            registry: None,
            seeds: OnceCell::new(),
        })
    }

    /// Build a context from pre-constructed parts (tests)
    pub fn from_parts(
        config: Arc<AnalysisConfig>,
        catalog: Arc<Catalog>,
        embedder: Arc<EmbeddingRouter>,
        store: Arc<dyn VectorStore>,
        registry: Option<Arc<dyn ContractorRegistry>>,
    ) -> Self {
        Self {
            config,
            catalog,
            embedder,
            store,
            registry,
            seeds: OnceCell::new(),
        }
    }

    /// Attach a contractor registry adapter
    pub fn with_registry(mut self, registry: Arc<dyn ContractorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Embed the taxonomy and risk seed corpora and persist their
    /// centroids. Idempotent; runs once per process.
    pub async fn ensure_seeds(&self) -> Result<()> {
        self.seeds
            .get_or_try_init(|| async {
                self.seed_sections().await?;
                self.seed_risks().await?;
                Ok::<(), crate::error::AnalysisError>(())
            })
            .await?;
        Ok(())
    }

    async fn seed_sections(&self) -> Result<()> {
        let mut items = Vec::new();
        for section in &self.catalog.taxonomy.sections {
            let batch = self.embedder.embed(&section.keywords).await?;
            let vector = centroid(&batch.vectors).expect("sections always have keywords");
            let mut metadata = HashMap::new();
            metadata.insert("kind".to_string(), "section".to_string());
            items.push(VectorItem {
                id: section.key.clone(),
                text: section.keywords.join(", "),
                metadata,
                vector,
            });
        }
        self.store.upsert(SECTION_SEEDS, items).await?;
        info!("Seeded {} section centroids", self.catalog.taxonomy.sections.len());
        Ok(())
    }

    async fn seed_risks(&self) -> Result<()> {
        let mut items = Vec::new();
        for category in &self.catalog.indicators.categories {
            let mut corpus = category.seed_terms.clone();
            corpus.extend(category.indicators.keys().cloned());
            let batch = self.embedder.embed(&corpus).await?;
            let vector = centroid(&batch.vectors).expect("categories always have seeds");
            let mut metadata = HashMap::new();
            metadata.insert("kind".to_string(), "risk".to_string());
            items.push(VectorItem {
                id: category.key.clone(),
                text: corpus.join(", "),
                metadata,
                vector,
            });
        }
        self.store.upsert(RISK_SEEDS, items).await?;
        info!(
            "Seeded {} risk category centroids",
            self.catalog.indicators.categories.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check("risk").is_ok());

        token.cancel();
        assert!(token.is_cancelled());
        let err = token.check("risk").unwrap_err();
        assert_eq!(err.code(), "cancelled");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
