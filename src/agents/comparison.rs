//! Comparison agent: aligns N analyzed documents along shared dimensions

use crate::artifacts::{comparison_id, AnalysisArtifact};
use crate::catalog::Taxonomy;
use crate::document::{AnalysisLevel, DocId, RunId};
use crate::embedding::cosine_similarity;
use crate::error::{InputError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A read-only view over a frozen set of artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    /// Ordered hash of the participating doc ids
    pub comparison_id: String,
    pub analysis_level: AnalysisLevel,
    /// Participants in input order
    pub doc_ids: Vec<DocId>,
    /// Doc id -> artifact reference
    pub runs: BTreeMap<String, RunId>,
    /// Dimension name -> differential
    pub dimensions: BTreeMap<String, DimensionDiff>,
    pub created_at: DateTime<Utc>,
}

/// Differential for one dimension. A participant missing the backing
/// stage appears with `value: null`, never aborts the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionDiff {
    Numeric {
        min: Option<f32>,
        max: Option<f32>,
        mean: Option<f32>,
        per_doc: Vec<NumericDocValue>,
    },
    Categorical {
        mode: Option<String>,
        per_doc: Vec<CategoricalDocValue>,
    },
    Section {
        /// Pairwise cosine similarity of section centroids; null when
        /// either participant lacks the section
        similarity: Vec<Vec<Option<f32>>>,
        /// Union of observed keywords with per-doc presence
        keywords: Vec<KeywordRow>,
        per_doc: Vec<NumericDocValue>,
    },
}

/// A numeric per-document entry with its rank (1 = best, ties broken
/// by earlier participant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericDocValue {
    pub doc_id: DocId,
    pub value: Option<f32>,
    pub rank: Option<usize>,
}

/// A categorical per-document entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalDocValue {
    pub doc_id: DocId,
    pub value: Option<String>,
}

/// One row of the union-of-keywords table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRow {
    pub keyword: String,
    pub present: Vec<bool>,
}

/// The comparison agent
pub struct ComparisonAgent;

impl ComparisonAgent {
    /// Compare an ordered list of artifacts of the same analysis level
    pub fn compare(&self, taxonomy: &Taxonomy, artifacts: &[AnalysisArtifact]) -> Result<Comparison> {
        if artifacts.len() < 2 {
            return Err(InputError::UnsupportedArtifact(
                "a comparison needs at least two documents".to_string(),
            )
            .into());
        }

        let level = artifacts[0].analysis_level;
        if artifacts.iter().any(|a| a.analysis_level != level) {
            return Err(InputError::UnsupportedArtifact(
                "comparison participants must share the analysis level".to_string(),
            )
            .into());
        }

        let doc_ids: Vec<DocId> = artifacts.iter().map(|a| a.doc_id.clone()).collect();
        let runs = artifacts
            .iter()
            .map(|a| (a.doc_id.as_str().to_string(), a.run_id.clone()))
            .collect();

        let mut dimensions = BTreeMap::new();

        dimensions.insert(
            "overall_score".to_string(),
            numeric_dimension(artifacts, |a| a.validation().map(|v| v.overall_score)),
        );
        dimensions.insert(
            "compliance_pct".to_string(),
            numeric_dimension(artifacts, |a| {
                a.validation().map(|v| v.compliance.overall_pct * 100.0)
            }),
        );
        dimensions.insert(
            "compliance_level".to_string(),
            categorical_dimension(artifacts, |a| {
                a.validation().map(|v| v.compliance.level.as_str().to_string())
            }),
        );
        dimensions.insert(
            "risk_level".to_string(),
            categorical_dimension(artifacts, |a| {
                a.risk().map(|r| r.overall_level.as_str().to_string())
            }),
        );

        for section in &taxonomy.sections {
            dimensions.insert(
                format!("section:{}", section.key),
                section_dimension(artifacts, &section.key),
            );
        }

        debug!(
            "Compared {} documents across {} dimensions",
            artifacts.len(),
            dimensions.len()
        );

        Ok(Comparison {
            comparison_id: comparison_id(&doc_ids),
            analysis_level: level,
            doc_ids,
            runs,
            dimensions,
            created_at: Utc::now(),
        })
    }
}

fn numeric_dimension(
    artifacts: &[AnalysisArtifact],
    extract: impl Fn(&AnalysisArtifact) -> Option<f32>,
) -> DimensionDiff {
    let values: Vec<Option<f32>> = artifacts.iter().map(&extract).collect();
    let available: Vec<f32> = values.iter().flatten().copied().collect();

    let (min, max, mean) = if available.is_empty() {
        (None, None, None)
    } else {
        let min = available.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = available.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mean = available.iter().sum::<f32>() / available.len() as f32;
        (Some(min), Some(max), Some(mean))
    };

    // Rank available values: highest first, ties to the earlier doc
    let mut order: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_some())
        .map(|(i, _)| i)
        .collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    let mut ranks: Vec<Option<usize>> = vec![None; artifacts.len()];
    for (position, &index) in order.iter().enumerate() {
        ranks[index] = Some(position + 1);
    }

    DimensionDiff::Numeric {
        min,
        max,
        mean,
        per_doc: artifacts
            .iter()
            .zip(values.iter())
            .zip(ranks.iter())
            .map(|((artifact, value), rank)| NumericDocValue {
                doc_id: artifact.doc_id.clone(),
                value: *value,
                rank: *rank,
            })
            .collect(),
    }
}

fn categorical_dimension(
    artifacts: &[AnalysisArtifact],
    extract: impl Fn(&AnalysisArtifact) -> Option<String>,
) -> DimensionDiff {
    let values: Vec<Option<String>> = artifacts.iter().map(&extract).collect();

    // Mode with ties broken by first appearance
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values.iter().flatten() {
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value.clone(), 1)),
        }
    }
    let mut mode: Option<String> = None;
    let mut best = 0usize;
    for (value, count) in &counts {
        if *count > best {
            best = *count;
            mode = Some(value.clone());
        }
    }

    DimensionDiff::Categorical {
        mode,
        per_doc: artifacts
            .iter()
            .zip(values)
            .map(|(artifact, value)| CategoricalDocValue {
                doc_id: artifact.doc_id.clone(),
                value,
            })
            .collect(),
    }
}

fn section_dimension(artifacts: &[AnalysisArtifact], section_key: &str) -> DimensionDiff {
    let centroids: Vec<Option<&Vec<f32>>> = artifacts
        .iter()
        .map(|a| {
            a.classification()
                .and_then(|c| c.section_centroids.get(section_key))
        })
        .collect();

    let n = artifacts.len();
    let mut similarity = vec![vec![None; n]; n];
    for i in 0..n {
        for j in 0..n {
            if let (Some(a), Some(b)) = (centroids[i], centroids[j]) {
                similarity[i][j] = Some(cosine_similarity(a, b).clamp(0.0, 1.0));
            }
        }
    }

    // Union of observed keywords in first-appearance order
    let mut union: Vec<String> = Vec::new();
    for artifact in artifacts {
        if let Some(classification) = artifact.classification() {
            if let Some(summary) = classification.sections.get(section_key) {
                for keyword in &summary.top_keywords {
                    if !union.contains(keyword) {
                        union.push(keyword.clone());
                    }
                }
            }
        }
    }
    let keywords = union
        .into_iter()
        .map(|keyword| KeywordRow {
            present: artifacts
                .iter()
                .map(|a| {
                    a.classification()
                        .and_then(|c| c.sections.get(section_key))
                        .map(|s| s.top_keywords.contains(&keyword))
                        .unwrap_or(false)
                })
                .collect(),
            keyword,
        })
        .collect();

    // Character mass of the section per document, ranked
    let per_doc = match numeric_dimension(artifacts, |a| {
        a.classification()
            .and_then(|c| c.sections.get(section_key))
            .map(|s| s.total_chars as f32)
    }) {
        DimensionDiff::Numeric { per_doc, .. } => per_doc,
        _ => unreachable!("numeric_dimension always returns Numeric"),
    };

    DimensionDiff::Section {
        similarity,
        keywords,
        per_doc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::classification::{ClassificationResult, SectionSummary};
    use crate::agents::validation::{
        ComplianceLevel, ComplianceReport, DateReport, StructuralReport, ValidationLevel,
        ValidationRecord,
    };
    use crate::agents::{stage, StageData, StageResult};
    use crate::artifacts::OverallStatus;
    use crate::catalog::default_taxonomy;

    fn validation_record(doc_id: &DocId, score: f32) -> ValidationRecord {
        ValidationRecord {
            doc_id: doc_id.clone(),
            overall_score: score,
            level: ValidationLevel::from_score(score),
            structural: StructuralReport {
                required_sections: vec![],
                found_sections: vec![],
                missing: vec![],
                completion_pct: 1.0,
                has_dates: true,
                adequate_length: true,
                total_chars: 5000,
                score: 100.0,
            },
            compliance: ComplianceReport {
                rules_checked: 4,
                rules_passed: 3,
                by_category: BTreeMap::new(),
                overall_pct: 0.75,
                level: ComplianceLevel::from_pct(0.75),
                score: 75.0,
            },
            dates: DateReport {
                count: 3,
                deadlines: 1,
                samples: vec![],
                issues: vec![],
                has_adequate_dates: true,
                score: 100.0,
            },
            recommendations: vec![],
            summary: String::new(),
        }
    }

    fn classification_with_legal(doc_id: &DocId, centroid: Vec<f32>) -> ClassificationResult {
        let mut sections = BTreeMap::new();
        sections.insert(
            "requisitos_legales".to_string(),
            SectionSummary {
                fragment_ids: vec![],
                fragment_count: 2,
                total_chars: 900,
                top_keywords: vec!["ruc".to_string(), "certificado".to_string()],
                mean_confidence: 0.7,
            },
        );
        let mut centroids = BTreeMap::new();
        centroids.insert("requisitos_legales".to_string(), centroid);
        ClassificationResult {
            doc_id: doc_id.clone(),
            sections,
            assignments: vec![],
            key_requirements: BTreeMap::new(),
            section_centroids: centroids,
        }
    }

    fn artifact(name: &str, score: Option<f32>, centroid: Option<Vec<f32>>) -> AnalysisArtifact {
        let doc_id = DocId::from_raw(name.to_string());
        let run_id = RunId::new(&doc_id, AnalysisLevel::Basic);
        let mut artifact = AnalysisArtifact::new(run_id, doc_id.clone(), AnalysisLevel::Basic);
        artifact.overall_status = OverallStatus::Success;

        if let Some(centroid) = centroid {
            artifact.stage_results.insert(
                stage::CLASSIFYING.to_string(),
                StageResult::success(
                    StageData::Classification(classification_with_legal(&doc_id, centroid)),
                    Utc::now(),
                ),
            );
        }
        if let Some(score) = score {
            artifact.stage_results.insert(
                stage::VALIDATING.to_string(),
                StageResult::success(
                    StageData::Validation(validation_record(&doc_id, score)),
                    Utc::now(),
                ),
            );
        }
        artifact
    }

    #[test]
    fn test_ranking_orders_by_score() {
        let taxonomy = default_taxonomy();
        let a = artifact("a", Some(85.0), Some(vec![1.0, 0.0]));
        let b = artifact("b", Some(70.0), Some(vec![0.8, 0.6]));

        let comparison = ComparisonAgent.compare(&taxonomy, &[a, b]).unwrap();
        match &comparison.dimensions["overall_score"] {
            DimensionDiff::Numeric { min, max, mean, per_doc } => {
                assert_eq!(*min, Some(70.0));
                assert_eq!(*max, Some(85.0));
                assert!((mean.unwrap() - 77.5).abs() < 1e-4);
                assert_eq!(per_doc[0].rank, Some(1));
                assert_eq!(per_doc[1].rank, Some(2));
            }
            other => panic!("unexpected dimension: {:?}", other),
        }
    }

    #[test]
    fn test_section_similarity_bounds() {
        let taxonomy = default_taxonomy();
        let a = artifact("a", Some(85.0), Some(vec![1.0, 0.0]));
        let b = artifact("b", Some(70.0), Some(vec![0.8, 0.6]));

        let comparison = ComparisonAgent.compare(&taxonomy, &[a, b]).unwrap();
        match &comparison.dimensions["section:requisitos_legales"] {
            DimensionDiff::Section { similarity, keywords, .. } => {
                let cross = similarity[0][1].unwrap();
                assert!((0.0..=1.0).contains(&cross));
                assert!((similarity[0][0].unwrap() - 1.0).abs() < 1e-5);
                assert!(keywords.iter().any(|k| k.keyword == "ruc"));
            }
            other => panic!("unexpected dimension: {:?}", other),
        }
    }

    #[test]
    fn test_missing_stage_is_unavailable_not_fatal() {
        let taxonomy = default_taxonomy();
        let a = artifact("a", Some(85.0), Some(vec![1.0, 0.0]));
        let b = artifact("b", None, None);

        let comparison = ComparisonAgent.compare(&taxonomy, &[a, b]).unwrap();
        match &comparison.dimensions["overall_score"] {
            DimensionDiff::Numeric { per_doc, mean, .. } => {
                assert_eq!(per_doc[1].value, None);
                assert_eq!(per_doc[1].rank, None);
                assert_eq!(*mean, Some(85.0));
            }
            other => panic!("unexpected dimension: {:?}", other),
        }
    }

    #[test]
    fn test_reordering_preserves_aggregates() {
        let taxonomy = default_taxonomy();
        let a = artifact("a", Some(85.0), Some(vec![1.0, 0.0]));
        let b = artifact("b", Some(70.0), Some(vec![0.8, 0.6]));

        let ab = ComparisonAgent.compare(&taxonomy, &[a.clone(), b.clone()]).unwrap();
        let ba = ComparisonAgent.compare(&taxonomy, &[b, a]).unwrap();

        for key in ["overall_score", "compliance_pct"] {
            match (&ab.dimensions[key], &ba.dimensions[key]) {
                (
                    DimensionDiff::Numeric { min: m1, max: x1, mean: e1, .. },
                    DimensionDiff::Numeric { min: m2, max: x2, mean: e2, .. },
                ) => {
                    assert_eq!(m1, m2);
                    assert_eq!(x1, x2);
                    assert_eq!(e1, e2);
                }
                _ => panic!("dimension shape changed"),
            }
        }
        assert_ne!(ab.comparison_id, ba.comparison_id);
    }

    #[test]
    fn test_single_document_rejected() {
        let taxonomy = default_taxonomy();
        let a = artifact("a", Some(85.0), None);
        let err = ComparisonAgent.compare(&taxonomy, &[a]).unwrap_err();
        assert_eq!(err.code(), "unsupported_artifact");
    }
}
