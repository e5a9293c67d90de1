//! Analysis agents and the capability contract they share
//!
//! The orchestrator knows agents only through [`AnalysisAgent`]:
//! a name, the stages it requires, the stage it produces, and `run`.
//! Stage payloads are tagged variants so downstream consumers match on
//! the tag instead of probing free-form maps.

pub mod classification;
pub mod comparison;
pub mod risk;
pub mod ruc;
pub mod validation;

use crate::catalog::Severity;
use crate::context::{AnalysisContext, CancelToken};
use crate::document::{DocType, Document, Fragment, RunId};
use crate::error::{AnalysisError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use classification::ClassificationResult;
pub use risk::RiskAssessment;
pub use ruc::RucRecord;
pub use validation::ValidationRecord;

/// Wire names of the pipeline stages
pub mod stage {
    pub const EXTRACTING: &str = "extracting";
    pub const CHUNKING: &str = "chunking";
    pub const CLASSIFYING: &str = "classifying";
    pub const VALIDATING: &str = "validating";
    pub const RISK: &str = "risk";
    pub const RUC: &str = "ruc";
    pub const AGGREGATING: &str = "aggregating";

    /// Stages that run concurrently after classification
    pub const CONCURRENT: [&str; 3] = [VALIDATING, RISK, RUC];
}

/// Outcome of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// Tagged stage payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageData {
    Extraction {
        text_chars: usize,
        page_count: Option<usize>,
        table_count: Option<usize>,
        detected_type: DocType,
    },
    Chunking {
        fragment_count: usize,
        total_chars: usize,
        embedding_provider: String,
        embedding_model: String,
        embedding_dimension: usize,
    },
    Classification(ClassificationResult),
    Validation(ValidationRecord),
    Risk(RiskAssessment),
    Ruc(RucRecord),
    /// Placeholder for failed or skipped stages
    None,
}

/// Error recorded on a stage artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageErrorRecord {
    pub code: String,
    pub message: String,
}

impl From<&AnalysisError> for StageErrorRecord {
    fn from(err: &AnalysisError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Persisted result of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub status: StageStatus,
    pub data: StageData,
    pub errors: Vec<StageErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    pub fn success(data: StageData, started_at: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Success,
            data,
            errors: Vec::new(),
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn failed(error: &AnalysisError, started_at: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Failed,
            data: StageData::None,
            errors: vec![StageErrorRecord::from(error)],
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn skipped(reason: &str) -> Self {
        let now = Utc::now();
        Self {
            status: StageStatus::Skipped,
            data: StageData::None,
            errors: vec![StageErrorRecord {
                code: "skipped".to_string(),
                message: reason.to_string(),
            }],
            started_at: now,
            ended_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}

/// A synthesized key finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub stage: String,
    pub severity: Severity,
    pub category: String,
    pub message: String,
}

/// Fragment-granular progress counter shared with the status API
#[derive(Debug, Default)]
pub struct StageProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl StageProgress {
    pub fn begin(&self, total: usize) {
        self.total.store(total.max(1), Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    pub fn tick(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        let total = self.total.load(Ordering::SeqCst);
        self.completed.store(total, Ordering::SeqCst);
    }

    /// Completed-fragment ratio in [0, 1]
    pub fn ratio(&self) -> f32 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        (self.completed.load(Ordering::SeqCst) as f32 / total as f32).min(1.0)
    }
}

/// Input handed to an agent by the orchestrator
pub struct StageInput<'a> {
    pub run_id: &'a RunId,
    pub document: &'a Document,
    pub fragments: &'a [Fragment],
    /// Present for the post-classification stages
    pub classification: Option<&'a ClassificationResult>,
    pub cancel: &'a CancelToken,
    pub progress: Arc<StageProgress>,
}

/// The capability contract between orchestrator and agents
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    /// Agent name for logs
    fn name(&self) -> &'static str;

    /// Stages whose output this agent consumes
    fn requires(&self) -> &'static [&'static str];

    /// Stage this agent produces
    fn produces(&self) -> &'static str;

    /// Execute the agent against the shared context
    async fn run(&self, ctx: &AnalysisContext, input: &StageInput<'_>) -> Result<StageData>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_constructors() {
        let started = Utc::now();
        let ok = StageResult::success(StageData::None, started);
        assert!(ok.is_success());
        assert!(ok.errors.is_empty());

        let err = AnalysisError::NotFound("artifact".to_string());
        let failed = StageResult::failed(&err, started);
        assert_eq!(failed.status, StageStatus::Failed);
        assert_eq!(failed.errors[0].code, "not_found");

        let skipped = StageResult::skipped("classification failed");
        assert_eq!(skipped.status, StageStatus::Skipped);
    }

    #[test]
    fn test_stage_progress_ratio() {
        let progress = StageProgress::default();
        assert_eq!(progress.ratio(), 0.0);

        progress.begin(4);
        progress.tick();
        progress.tick();
        assert!((progress.ratio() - 0.5).abs() < 1e-6);

        progress.finish();
        assert!((progress.ratio() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stage_data_tagged_serialization() {
        let data = StageData::Extraction {
            text_chars: 120,
            page_count: Some(3),
            table_count: None,
            detected_type: DocType::Propuesta,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "extraction");
        assert_eq!(json["detected_type"], "propuesta");
    }
}
