//! Analysis artifacts and their on-disk store
//!
//! Artifacts are written atomically (temp file + rename) so a crash
//! never leaves a half-written record, and a re-run with the same run
//! id resumes from whatever stages already completed.

use crate::agents::comparison::Comparison;
use crate::agents::{ClassificationResult, Finding, RiskAssessment, RucRecord, StageData, StageResult, StageStatus, ValidationRecord};
use crate::document::{AnalysisLevel, DocId, RunId};
use crate::error::{FatalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Outcome of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialSuccess,
    Failed,
}

/// The persisted record of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub run_id: RunId,
    pub doc_id: DocId,
    pub analysis_level: AnalysisLevel,
    pub stage_results: BTreeMap<String, StageResult>,
    pub overall_status: OverallStatus,
    pub key_findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisArtifact {
    pub fn new(run_id: RunId, doc_id: DocId, analysis_level: AnalysisLevel) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            doc_id,
            analysis_level,
            stage_results: BTreeMap::new(),
            overall_status: OverallStatus::Failed,
            key_findings: Vec::new(),
            recommendations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.get(name)
    }

    /// Status of a stage; an absent stage reads as skipped so API
    /// consumers never see missing keys
    pub fn stage_status(&self, name: &str) -> StageStatus {
        self.stage_results
            .get(name)
            .map(|s| s.status)
            .unwrap_or(StageStatus::Skipped)
    }

    pub fn stage_succeeded(&self, name: &str) -> bool {
        self.stage_status(name) == StageStatus::Success
    }

    pub fn classification(&self) -> Option<&ClassificationResult> {
        match self.stage(crate::agents::stage::CLASSIFYING).map(|s| &s.data) {
            Some(StageData::Classification(result)) => Some(result),
            _ => None,
        }
    }

    pub fn validation(&self) -> Option<&ValidationRecord> {
        match self.stage(crate::agents::stage::VALIDATING).map(|s| &s.data) {
            Some(StageData::Validation(record)) => Some(record),
            _ => None,
        }
    }

    pub fn risk(&self) -> Option<&RiskAssessment> {
        match self.stage(crate::agents::stage::RISK).map(|s| &s.data) {
            Some(StageData::Risk(assessment)) => Some(assessment),
            _ => None,
        }
    }

    pub fn ruc(&self) -> Option<&RucRecord> {
        match self.stage(crate::agents::stage::RUC).map(|s| &s.data) {
            Some(StageData::Ruc(record)) => Some(record),
            _ => None,
        }
    }
}

/// Stable id over an ordered list of participating documents
pub fn comparison_id(doc_ids: &[DocId]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for doc_id in doc_ids {
        hasher.update(doc_id.as_str().as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// On-disk store for artifacts and comparisons
pub struct ArtifactStore {
    artifacts_dir: PathBuf,
    comparisons_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store under the data root, ensuring its directories
    pub fn new(data_root: &Path) -> Result<Self> {
        let artifacts_dir = data_root.join("artifacts");
        let comparisons_dir = data_root.join("comparisons");
        std::fs::create_dir_all(&artifacts_dir)?;
        std::fs::create_dir_all(&comparisons_dir)?;
        Ok(Self {
            artifacts_dir,
            comparisons_dir,
        })
    }

    fn artifact_path(&self, run_id: &RunId) -> PathBuf {
        self.artifacts_dir.join(format!("{}.json", run_id))
    }

    fn comparison_path(&self, id: &str) -> PathBuf {
        self.comparisons_dir.join(format!("{}.json", id))
    }

    /// Atomically persist an artifact
    pub async fn save_artifact(&self, artifact: &AnalysisArtifact) -> Result<()> {
        let path = self.artifact_path(&artifact.run_id);
        write_atomic(&path, artifact).await?;
        debug!("Persisted artifact {}", artifact.run_id);
        Ok(())
    }

    /// Load an artifact by run id
    pub async fn load_artifact(&self, run_id: &RunId) -> Result<Option<AnalysisArtifact>> {
        read_json(&self.artifact_path(run_id)).await
    }

    /// The most recently updated artifact for a document, any level
    pub async fn latest_artifact_for_doc(&self, doc_id: &DocId) -> Result<Option<AnalysisArtifact>> {
        let mut latest: Option<AnalysisArtifact> = None;
        for level in [AnalysisLevel::Comprehensive, AnalysisLevel::Basic] {
            let run_id = RunId::new(doc_id, level);
            if let Some(artifact) = self.load_artifact(&run_id).await? {
                let newer = latest
                    .as_ref()
                    .map(|l| artifact.updated_at > l.updated_at)
                    .unwrap_or(true);
                if newer {
                    latest = Some(artifact);
                }
            }
        }
        Ok(latest)
    }

    /// Remove an artifact; used when a fatal error must not expose a
    /// partial record
    pub async fn delete_artifact(&self, run_id: &RunId) -> Result<()> {
        match fs::remove_file(self.artifact_path(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List all persisted run ids
    pub async fn list_runs(&self) -> Result<Vec<RunId>> {
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.artifacts_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                runs.push(RunId::from_raw(stem.to_string()));
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Atomically persist a comparison
    pub async fn save_comparison(&self, comparison: &Comparison) -> Result<()> {
        let path = self.comparison_path(&comparison.comparison_id);
        write_atomic(&path, comparison).await?;
        debug!("Persisted comparison {}", comparison.comparison_id);
        Ok(())
    }

    /// Load a comparison by id
    pub async fn load_comparison(&self, id: &str) -> Result<Option<Comparison>> {
        read_json(&self.comparison_path(id)).await
    }
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Corrupted artifact at {}: {}", path.display(), e);
                Err(FatalError::CorruptedArtifactStore(format!(
                    "{}: {}",
                    path.display(),
                    e
                ))
                .into())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::StageData;

    fn artifact(run_suffix: &str) -> AnalysisArtifact {
        let doc_id = DocId::from_raw(format!("doc-{}", run_suffix));
        let run_id = RunId::new(&doc_id, AnalysisLevel::Basic);
        let mut artifact = AnalysisArtifact::new(run_id, doc_id, AnalysisLevel::Basic);
        artifact.overall_status = OverallStatus::Success;
        artifact.stage_results.insert(
            crate::agents::stage::EXTRACTING.to_string(),
            StageResult::success(StageData::None, Utc::now()),
        );
        artifact
    }

    #[tokio::test]
    async fn test_artifact_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let original = artifact("a");
        store.save_artifact(&original).await.unwrap();

        let loaded = store.load_artifact(&original.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.run_id, original.run_id);
        assert_eq!(loaded.overall_status, OverallStatus::Success);
        assert!(loaded.stage_succeeded(crate::agents::stage::EXTRACTING));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let missing = store
            .load_artifact(&RunId::from_raw("nope-basic"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupted_artifact_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let run_id = RunId::from_raw("broken-basic");
        tokio::fs::write(dir.path().join("artifacts/broken-basic.json"), b"{not json")
            .await
            .unwrap();

        let err = store.load_artifact(&run_id).await.unwrap_err();
        assert_eq!(err.code(), "corrupted_artifact_store");
    }

    #[tokio::test]
    async fn test_list_runs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store.save_artifact(&artifact("b")).await.unwrap();
        store.save_artifact(&artifact("a")).await.unwrap();

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0] < runs[1]);
    }

    #[test]
    fn test_comparison_id_is_order_sensitive() {
        let a = DocId::from_raw("aaa");
        let b = DocId::from_raw("bbb");
        let ab = comparison_id(&[a.clone(), b.clone()]);
        let ba = comparison_id(&[b, a]);
        assert_ne!(ab, ba);
        assert_eq!(ab.len(), 64);
    }

    #[test]
    fn test_absent_stage_reads_as_skipped() {
        let artifact = artifact("x");
        assert_eq!(
            artifact.stage_status(crate::agents::stage::RISK),
            StageStatus::Skipped
        );
    }
}
