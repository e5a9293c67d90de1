//! Report assembler: collate analysis output into a render-ready bundle
//!
//! The bundle is format-agnostic; JSON/HTML/PDF emitters are external
//! consumers of this structure.

use crate::agents::comparison::{Comparison, DimensionDiff};
use crate::agents::{stage, Finding, StageData, StageResult};
use crate::artifacts::{AnalysisArtifact, OverallStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Render-ready report structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBundle {
    pub title: String,
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    pub executive_summary: ExecutiveSummary,
    pub stages: Vec<StageSection>,
    pub metrics: BTreeMap<String, f64>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
}

/// Leading block of every report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub headline: String,
    pub status: String,
    pub highlights: Vec<String>,
}

/// Per-stage breakdown entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSection {
    pub name: String,
    pub status: String,
    pub summary: String,
    /// Full stage payload for renderers that want the detail
    pub details: serde_json::Value,
}

/// Pure transformation from artifacts and comparisons to bundles
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn from_artifact(&self, artifact: &AnalysisArtifact) -> ReportBundle {
        let mut metrics = BTreeMap::new();
        let mut highlights = Vec::new();

        if let Some(validation) = artifact.validation() {
            metrics.insert("overall_score".to_string(), validation.overall_score as f64);
            metrics.insert(
                "compliance_pct".to_string(),
                (validation.compliance.overall_pct * 100.0) as f64,
            );
            highlights.push(format!(
                "Validation: {} ({:.0}/100)",
                validation.level.as_str(),
                validation.overall_score
            ));
        }
        if let Some(risk) = artifact.risk() {
            metrics.insert("risk_score".to_string(), risk.total_score as f64);
            highlights.push(format!(
                "Risk: {} ({:.0}/100)",
                risk.overall_level.as_str(),
                risk.total_score
            ));
        }
        if let Some(ruc) = artifact.ruc() {
            metrics.insert("ruc_score".to_string(), ruc.score as f64);
            highlights.push(format!(
                "Contractor ID: {} ({} candidates)",
                ruc.bucket.as_str(),
                ruc.found.len()
            ));
        }
        if let Some(classification) = artifact.classification() {
            metrics.insert(
                "sections_found".to_string(),
                classification.found_sections().len() as f64,
            );
            metrics.insert(
                "fragments".to_string(),
                classification.assignments.len() as f64,
            );
        }

        let stages = ordered_stages()
            .iter()
            .filter_map(|name| {
                artifact
                    .stage(name)
                    .map(|result| stage_section(name, result))
            })
            .collect();

        ReportBundle {
            title: format!("Analysis of document {}", artifact.doc_id.short()),
            report_type: "analysis".to_string(),
            generated_at: Utc::now(),
            executive_summary: ExecutiveSummary {
                headline: headline(artifact),
                status: status_str(artifact.overall_status).to_string(),
                highlights,
            },
            stages,
            metrics,
            findings: artifact.key_findings.clone(),
            recommendations: artifact.recommendations.clone(),
        }
    }

    pub fn from_comparison(&self, comparison: &Comparison) -> ReportBundle {
        let mut metrics = BTreeMap::new();
        metrics.insert("documents".to_string(), comparison.doc_ids.len() as f64);
        metrics.insert(
            "dimensions".to_string(),
            comparison.dimensions.len() as f64,
        );

        let mut highlights = Vec::new();
        if let Some(DimensionDiff::Numeric { min, max, per_doc, .. }) =
            comparison.dimensions.get("overall_score")
        {
            if let (Some(min), Some(max)) = (min, max) {
                highlights.push(format!("Overall scores span {:.0} to {:.0}", min, max));
            }
            if let Some(best) = per_doc.iter().find(|d| d.rank == Some(1)) {
                highlights.push(format!("Best ranked document: {}", best.doc_id.short()));
            }
        }

        let stages = comparison
            .dimensions
            .iter()
            .map(|(name, diff)| StageSection {
                name: name.clone(),
                status: "success".to_string(),
                summary: dimension_summary(name, diff),
                details: serde_json::to_value(diff).unwrap_or(serde_json::Value::Null),
            })
            .collect();

        ReportBundle {
            title: format!("Comparison of {} documents", comparison.doc_ids.len()),
            report_type: "comparison".to_string(),
            generated_at: Utc::now(),
            executive_summary: ExecutiveSummary {
                headline: format!(
                    "{} documents compared across {} dimensions",
                    comparison.doc_ids.len(),
                    comparison.dimensions.len()
                ),
                status: "success".to_string(),
                highlights,
            },
            stages,
            metrics,
            findings: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

fn ordered_stages() -> [&'static str; 7] {
    [
        stage::EXTRACTING,
        stage::CHUNKING,
        stage::CLASSIFYING,
        stage::VALIDATING,
        stage::RISK,
        stage::RUC,
        stage::AGGREGATING,
    ]
}

fn status_str(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Success => "success",
        OverallStatus::PartialSuccess => "partial_success",
        OverallStatus::Failed => "failed",
    }
}

fn headline(artifact: &AnalysisArtifact) -> String {
    match (artifact.validation(), artifact.risk()) {
        (Some(validation), Some(risk)) => format!(
            "{} with {} risk",
            validation.level.as_str(),
            risk.overall_level.as_str()
        ),
        (Some(validation), None) => validation.level.as_str().to_string(),
        _ => format!("Run {}", status_str(artifact.overall_status)),
    }
}

fn stage_section(name: &str, result: &StageResult) -> StageSection {
    let status = match result.status {
        crate::agents::StageStatus::Success => "success",
        crate::agents::StageStatus::Failed => "failed",
        crate::agents::StageStatus::Skipped => "skipped",
    };

    let summary = match &result.data {
        StageData::Extraction {
            text_chars,
            page_count,
            detected_type,
            ..
        } => format!(
            "{} chars extracted ({} type, {} pages)",
            text_chars,
            detected_type,
            page_count.map_or("?".to_string(), |p| p.to_string())
        ),
        StageData::Chunking {
            fragment_count,
            embedding_provider,
            embedding_model,
            ..
        } => format!(
            "{} fragments embedded via {} ({})",
            fragment_count, embedding_provider, embedding_model
        ),
        StageData::Classification(result) => format!(
            "{} fragments over {} sections",
            result.assignments.len(),
            result.found_sections().len()
        ),
        StageData::Validation(record) => record.summary.clone(),
        StageData::Risk(assessment) => format!(
            "{} total risk, {} critical findings",
            assessment.overall_level.as_str(),
            assessment.critical_risks.len()
        ),
        StageData::Ruc(record) => format!(
            "{} candidates, bucket {}",
            record.found.len(),
            record.bucket.as_str()
        ),
        StageData::None => result
            .errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "no data".to_string()),
    };

    StageSection {
        name: name.to_string(),
        status: status.to_string(),
        summary,
        details: serde_json::to_value(&result.data).unwrap_or(serde_json::Value::Null),
    }
}

fn dimension_summary(name: &str, diff: &DimensionDiff) -> String {
    match diff {
        DimensionDiff::Numeric { min, max, mean, .. } => match (min, max, mean) {
            (Some(min), Some(max), Some(mean)) => {
                format!("{}: min {:.1}, max {:.1}, mean {:.1}", name, min, max, mean)
            }
            _ => format!("{}: unavailable", name),
        },
        DimensionDiff::Categorical { mode, .. } => match mode {
            Some(mode) => format!("{}: mode {}", name, mode),
            None => format!("{}: unavailable", name),
        },
        DimensionDiff::Section { keywords, .. } => {
            format!("{}: {} shared keywords", name, keywords.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AnalysisLevel, DocId, RunId};
    use chrono::Utc;

    fn minimal_artifact() -> AnalysisArtifact {
        let doc_id = DocId::from_raw("doc");
        let run_id = RunId::new(&doc_id, AnalysisLevel::Basic);
        let mut artifact = AnalysisArtifact::new(run_id, doc_id, AnalysisLevel::Basic);
        artifact.overall_status = OverallStatus::PartialSuccess;
        artifact.stage_results.insert(
            stage::EXTRACTING.to_string(),
            StageResult::success(
                StageData::Extraction {
                    text_chars: 9000,
                    page_count: Some(4),
                    table_count: None,
                    detected_type: crate::document::DocType::Pliego,
                },
                Utc::now(),
            ),
        );
        artifact.stage_results.insert(
            stage::RISK.to_string(),
            StageResult::skipped("classification failed"),
        );
        artifact
    }

    #[test]
    fn test_bundle_from_artifact() {
        let bundle = ReportAssembler.from_artifact(&minimal_artifact());
        assert_eq!(bundle.report_type, "analysis");
        assert_eq!(bundle.executive_summary.status, "partial_success");

        let names: Vec<&str> = bundle.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![stage::EXTRACTING, stage::RISK]);
        assert_eq!(bundle.stages[1].status, "skipped");
        assert!(bundle.stages[0].summary.contains("9000 chars"));
    }

    #[test]
    fn test_bundle_serializes_cleanly() {
        let bundle = ReportAssembler.from_artifact(&minimal_artifact());
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json["executive_summary"]["headline"].is_string());
        assert!(json["stages"].is_array());
    }
}
