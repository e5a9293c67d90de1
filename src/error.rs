//! Error handling for the analysis core

use thiserror::Error;

/// Result type alias for the analysis core
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Main error type for the analysis core
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("stage error: {0}")]
    Stage(#[from] StageError),

    #[error("dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("fatal error: {0}")]
    Fatal(#[from] FatalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors that reject an artifact before a run starts
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Unsupported artifact: {0}")]
    UnsupportedArtifact(String),

    #[error("Document is empty: {0}")]
    EmptyDocument(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

/// Errors confined to a single pipeline stage
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Stage {stage} exceeded its budget of {budget_ms}ms")]
    StageTimeout { stage: String, budget_ms: u64 },

    #[error("Pattern matching degraded in {stage}: {reason}")]
    PatternMatchDegraded { stage: String, reason: String },

    #[error("Partial extraction: {0}")]
    PartialExtraction(String),

    #[error("Stage {stage} cancelled")]
    Cancelled { stage: String },

    #[error("Stage {stage} is missing required input {input}")]
    MissingInput { stage: String, input: String },
}

/// Errors from external dependencies, retried with backoff
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("No embedding provider available: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("Contractor registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors that terminate the run with no partial artifact exposed
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("Embedding dimension mismatch: collection {collection} expects {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Artifact store corrupted: {0}")]
    CorruptedArtifactStore(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl AnalysisError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::Dependency(_) | AnalysisError::Http(_)
        )
    }

    /// True when the error must terminate the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalysisError::Fatal(_))
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            AnalysisError::Input(_) => "input",
            AnalysisError::Stage(_) => "stage",
            AnalysisError::Dependency(_) => "dependency",
            AnalysisError::Fatal(_) => "fatal",
            AnalysisError::Io(_) => "io",
            AnalysisError::Serialization(_) => "serialization",
            AnalysisError::Http(_) => "http",
            AnalysisError::Database(_) => "database",
            AnalysisError::Generic(_) => "generic",
            AnalysisError::NotFound(_) => "not_found",
        }
    }

    /// Short machine-readable code recorded on stage artifacts
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::Input(InputError::UnsupportedArtifact(_)) => "unsupported_artifact",
            AnalysisError::Input(InputError::EmptyDocument(_)) => "empty_document",
            AnalysisError::Input(InputError::ChecksumMismatch { .. }) => "checksum_mismatch",
            AnalysisError::Stage(StageError::StageTimeout { .. }) => "stage_timeout",
            AnalysisError::Stage(StageError::PatternMatchDegraded { .. }) => {
                "pattern_match_degraded"
            }
            AnalysisError::Stage(StageError::PartialExtraction(_)) => "partial_extraction",
            AnalysisError::Stage(StageError::Cancelled { .. }) => "cancelled",
            AnalysisError::Stage(StageError::MissingInput { .. }) => "missing_input",
            AnalysisError::Dependency(DependencyError::EmbeddingUnavailable(_)) => {
                "embedding_unavailable"
            }
            AnalysisError::Dependency(DependencyError::VectorStoreUnavailable(_)) => {
                "vector_store_unavailable"
            }
            AnalysisError::Dependency(DependencyError::RegistryUnavailable(_)) => {
                "registry_unavailable"
            }
            AnalysisError::Dependency(DependencyError::Timeout) => "dependency_timeout",
            AnalysisError::Fatal(FatalError::DimensionMismatch { .. }) => "dimension_mismatch",
            AnalysisError::Fatal(FatalError::CorruptedArtifactStore(_)) => {
                "corrupted_artifact_store"
            }
            AnalysisError::Fatal(FatalError::ConfigInvalid(_)) => "config_invalid",
            AnalysisError::Io(_) => "io",
            AnalysisError::Serialization(_) => "serialization",
            AnalysisError::Http(_) => "http",
            AnalysisError::Database(_) => "database",
            AnalysisError::Generic(_) => "generic",
            AnalysisError::NotFound(_) => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let dep = AnalysisError::Dependency(DependencyError::Timeout);
        assert!(dep.is_retryable());

        let config = AnalysisError::Fatal(FatalError::ConfigInvalid("bad".to_string()));
        assert!(!config.is_retryable());
        assert!(config.is_fatal());
    }

    #[test]
    fn test_error_category_and_code() {
        let err = AnalysisError::Dependency(DependencyError::EmbeddingUnavailable(
            "all providers failed".to_string(),
        ));
        assert_eq!(err.category(), "dependency");
        assert_eq!(err.code(), "embedding_unavailable");

        let err = AnalysisError::Fatal(FatalError::DimensionMismatch {
            collection: "fragments".to_string(),
            expected: 768,
            actual: 384,
        });
        assert_eq!(err.code(), "dimension_mismatch");
    }

    #[test]
    fn test_input_errors_are_not_fatal() {
        let err = AnalysisError::Input(InputError::EmptyDocument("empty.txt".to_string()));
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "input");
    }
}
