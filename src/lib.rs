//! TenderLens Analysis Core
//!
//! A document-analysis pipeline for construction tenders that integrates:
//! - Deterministic stage orchestration with partial-failure tolerance
//! - Taxonomy-driven section classification over embedded fragments
//! - Rule-based compliance validation and multi-category risk scoring
//! - Contractor-ID (RUC) checksum validation
//! - Multi-document comparison over shared dimensions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenderlens::{AnalysisConfig, AnalysisContext, AnalysisLevel, DocType, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = AnalysisContext::initialize(AnalysisConfig::default()).await?;
//!     let orchestrator = Arc::new(Orchestrator::new(Arc::new(ctx))?);
//!
//!     let document = orchestrator
//!         .ingest("propuesta.pdf".as_ref(), DocType::Propuesta)
//!         .await?;
//!     let artifact = orchestrator
//!         .run_to_completion(document, AnalysisLevel::Comprehensive, false)
//!         .await?;
//!
//!     println!("Run finished: {:?}", artifact.overall_status);
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod api;
pub mod artifacts;
pub mod catalog;
pub mod chunker;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod report;
pub mod store;

// Re-export main types
pub use agents::comparison::{Comparison, ComparisonAgent, DimensionDiff};
pub use agents::risk::{RiskAssessment, RiskLevel};
pub use agents::ruc::{ContractorRegistry, RegistryEntry, RucBucket, RucRecord};
pub use agents::validation::{ComplianceLevel, ValidationLevel, ValidationRecord};
pub use agents::{
    AnalysisAgent, ClassificationResult, Finding, StageData, StageInput, StageResult, StageStatus,
};
pub use artifacts::{AnalysisArtifact, ArtifactStore, OverallStatus};
pub use catalog::{Catalog, IndicatorBanks, RuleSets, Severity, Taxonomy};
pub use chunker::TextChunker;
pub use config::{AnalysisConfig, EmbeddingConfig, ProviderConfig, ProviderKind};
pub use context::{AnalysisContext, CancelToken};
pub use document::{AnalysisLevel, DocId, DocType, Document, Fragment, RunId};
pub use embedding::{EmbeddingBackend, EmbeddingBatch, EmbeddingRouter};
pub use error::{AnalysisError, Result};
pub use extractor::DocumentExtractor;
pub use orchestrator::{Orchestrator, RunStatus, WorkerPool};
pub use report::{ReportAssembler, ReportBundle};
pub use store::{SqliteVectorStore, VectorStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
