//! Risk agent: indicator and semantic scoring over five categories

use crate::agents::{stage, AnalysisAgent, StageData, StageInput};
use crate::catalog::IndicatorBanks;
use crate::context::{AnalysisContext, RISK_SEEDS};
use crate::document::{DocId, Document, Fragment};
use crate::embedding::cosine_similarity;
use crate::error::{Result, StageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Scale factor for the indicator term of a category score
const INDICATOR_SCALE: f32 = 10.0;

/// Scale factor for the semantic term of a category score
const SEMANTIC_SCALE: f32 = 60.0;

/// Fragments that contribute to the semantic score per category
const TOP_FRAGMENTS: usize = 5;

/// Risk bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_score(score: f32) -> Self {
        if score < 25.0 {
            RiskLevel::Low
        } else if score < 50.0 {
            RiskLevel::Medium
        } else if score < 75.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very_high",
        }
    }

    pub fn at_least_high(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::VeryHigh)
    }
}

/// Per-document risk output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub doc_id: DocId,
    pub categories: BTreeMap<String, CategoryRisk>,
    /// Weighted average of the category scores
    pub total_score: f32,
    pub overall_level: RiskLevel,
    pub critical_risks: Vec<String>,
    pub mitigations: Vec<String>,
    pub matrix: RiskMatrix,
}

/// One category's scoring detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRisk {
    pub score: f32,
    pub level: RiskLevel,
    pub indicators_detected: usize,
    pub mentions: Vec<RiskMention>,
    pub semantic_risks: Vec<SemanticRisk>,
    pub weight: f32,
}

/// A detected indicator term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMention {
    pub term: String,
    pub severity: u8,
    pub occurrences: usize,
}

/// A fragment semantically close to the category seeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRisk {
    pub fragment_ordinal: usize,
    pub similarity: f32,
    pub excerpt: String,
}

/// Categories grouped by band for the report matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMatrix {
    pub low: Vec<String>,
    pub medium: Vec<String>,
    pub high: Vec<String>,
}

/// The risk agent
pub struct RiskAgent;

#[async_trait]
impl AnalysisAgent for RiskAgent {
    fn name(&self) -> &'static str {
        "risk"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[stage::CLASSIFYING]
    }

    fn produces(&self) -> &'static str {
        stage::RISK
    }

    async fn run(&self, ctx: &AnalysisContext, input: &StageInput<'_>) -> Result<StageData> {
        // Category seed centroids, computed once at startup
        let mut centroids: BTreeMap<String, Vec<f32>> = BTreeMap::new();
        for category in &ctx.catalog.indicators.categories {
            let item = ctx
                .store
                .get(RISK_SEEDS, &category.key)
                .await?
                .ok_or_else(|| StageError::MissingInput {
                    stage: stage::RISK.to_string(),
                    input: format!("seed centroid for category '{}'", category.key),
                })?;
            centroids.insert(category.key.clone(), item.vector);
        }

        input.progress.begin(input.fragments.len());
        for _ in input.fragments {
            input.cancel.check(stage::RISK)?;
            input.progress.tick();
        }

        let assessment = assess(
            &ctx.catalog.indicators,
            input.document,
            input.fragments,
            &centroids,
        );
        input.progress.finish();

        debug!(
            "Risk for {}: {:.1}/100 ({})",
            input.document.doc_id.short(),
            assessment.total_score,
            assessment.overall_level.as_str()
        );

        Ok(StageData::Risk(assessment))
    }
}

/// Deterministic risk scoring over indicator banks and fragment vectors
pub fn assess(
    banks: &IndicatorBanks,
    document: &Document,
    fragments: &[Fragment],
    centroids: &BTreeMap<String, Vec<f32>>,
) -> RiskAssessment {
    let lower = document.text.to_lowercase();
    let mut categories: BTreeMap<String, CategoryRisk> = BTreeMap::new();

    for category in &banks.categories {
        let mut mentions = Vec::new();
        let mut indicator_score = 0.0f32;

        for (term, severity) in &category.indicators {
            let occurrences = lower.matches(&term.to_lowercase()).count();
            if occurrences > 0 {
                indicator_score += *severity as f32 * (1.0 + occurrences as f32).ln();
                mentions.push(RiskMention {
                    term: term.clone(),
                    severity: *severity,
                    occurrences,
                });
            }
        }

        // Top fragments by similarity to the category centroid
        let mut semantic_risks: Vec<SemanticRisk> = Vec::new();
        if let Some(centroid) = centroids.get(&category.key) {
            let mut scored: Vec<(usize, f32)> = fragments
                .iter()
                .filter_map(|f| {
                    f.vector
                        .as_ref()
                        .map(|v| (f.ordinal, cosine_similarity(v, centroid).max(0.0)))
                })
                .collect();
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            semantic_risks = scored
                .into_iter()
                .take(TOP_FRAGMENTS)
                .map(|(ordinal, similarity)| SemanticRisk {
                    fragment_ordinal: ordinal,
                    similarity,
                    excerpt: excerpt(&fragments[ordinal].text),
                })
                .collect();
        }

        let semantic_score = if semantic_risks.is_empty() {
            0.0
        } else {
            semantic_risks.iter().map(|s| s.similarity).sum::<f32>()
                / semantic_risks.len() as f32
        };

        let score = (INDICATOR_SCALE * indicator_score + SEMANTIC_SCALE * semantic_score)
            .min(100.0);

        categories.insert(
            category.key.clone(),
            CategoryRisk {
                score,
                level: RiskLevel::from_score(score),
                indicators_detected: mentions.len(),
                mentions,
                semantic_risks,
                weight: category.weight,
            },
        );
    }

    let weight_sum: f32 = categories.values().map(|c| c.weight).sum();
    let total_score = if weight_sum > 0.0 {
        categories.values().map(|c| c.weight * c.score).sum::<f32>() / weight_sum
    } else {
        0.0
    };
    let overall_level = RiskLevel::from_score(total_score);

    let critical_risks = find_critical(banks, &categories);
    let mitigations = select_mitigations(banks, &categories);

    let mut matrix = RiskMatrix {
        low: Vec::new(),
        medium: Vec::new(),
        high: Vec::new(),
    };
    for (key, category) in &categories {
        match category.level {
            RiskLevel::Low => matrix.low.push(key.clone()),
            RiskLevel::Medium => matrix.medium.push(key.clone()),
            RiskLevel::High | RiskLevel::VeryHigh => matrix.high.push(key.clone()),
        }
    }

    RiskAssessment {
        doc_id: document.doc_id.clone(),
        categories,
        total_score,
        overall_level,
        critical_risks,
        mitigations,
        matrix,
    }
}

/// A high+ category is critical when its top contributing fragment
/// carries legal or monetary language
fn find_critical(
    banks: &IndicatorBanks,
    categories: &BTreeMap<String, CategoryRisk>,
) -> Vec<String> {
    let mut critical = Vec::new();
    for (key, category) in categories {
        if !category.level.at_least_high() {
            continue;
        }
        if let Some(top) = category.semantic_risks.first() {
            let lower = top.excerpt.to_lowercase();
            let has_exposure = banks
                .legal_monetary_terms
                .iter()
                .any(|term| lower.contains(&term.to_lowercase()));
            if has_exposure {
                critical.push(format!(
                    "{} risk ({}) with legal/monetary exposure: {}",
                    key,
                    category.level.as_str(),
                    top.excerpt
                ));
            }
        }
    }
    critical
}

/// Mitigation templates filtered by which indicators fired
fn select_mitigations(
    banks: &IndicatorBanks,
    categories: &BTreeMap<String, CategoryRisk>,
) -> Vec<String> {
    let mut mitigations = Vec::new();
    for (key, category) in categories {
        if category.indicators_detected == 0 {
            continue;
        }
        let fired: Vec<&str> = category.mentions.iter().map(|m| m.term.as_str()).collect();
        if let Some(def) = banks.category(key) {
            for template in &def.mitigations {
                let applies = match &template.indicator {
                    Some(indicator) => fired.contains(&indicator.as_str()),
                    None => true,
                };
                if applies && !mitigations.contains(&template.text) {
                    mitigations.push(template.text.clone());
                }
            }
        }
    }
    mitigations
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 160;
    if text.chars().count() <= MAX {
        text.trim().to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}…", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_indicators;
    use crate::document::{DocId, DocType};
    use chrono::Utc;
    use uuid::Uuid;

    fn document(text: &str) -> Document {
        Document {
            doc_id: DocId::fingerprint(DocType::Contrato, text),
            path: "test.txt".into(),
            declared_type: DocType::Contrato,
            detected_type: DocType::Contrato,
            text: text.to_string(),
            page_count: None,
            table_count: None,
            created_at: Utc::now(),
        }
    }

    fn fragment(ordinal: usize, text: &str, vector: Vec<f32>) -> Fragment {
        Fragment {
            id: Uuid::new_v4(),
            doc_id: DocId::from_raw("test"),
            ordinal,
            text: text.to_string(),
            char_span: (0, text.len()),
            vector: Some(vector),
            assigned_section: None,
            assignment_confidence: None,
        }
    }

    fn no_centroids() -> BTreeMap<String, Vec<f32>> {
        BTreeMap::new()
    }

    #[test]
    fn test_indicator_scoring_detects_terms() {
        let banks = default_indicators();
        let doc = document(
            "Existe riesgo de sobrecosto por la fluctuación de precios. \
             El contrato prevé terminación unilateral y multa diaria.",
        );
        let assessment = assess(&banks, &doc, &[], &no_centroids());

        let economic = &assessment.categories["economic"];
        assert!(economic.indicators_detected >= 2);
        assert!(economic.score > 0.0);

        let legal = &assessment.categories["legal"];
        assert!(legal
            .mentions
            .iter()
            .any(|m| m.term == "terminación unilateral" && m.severity == 3));
    }

    #[test]
    fn test_risk_monotonicity() {
        let banks = default_indicators();
        let base = document("El proyecto presenta un posible sobrecosto en cimentación.");
        let more = document(
            "El proyecto presenta un posible sobrecosto en cimentación. \
             Se advierte otro sobrecosto en la estructura metálica.",
        );

        let a = assess(&banks, &base, &[], &no_centroids());
        let b = assess(&banks, &more, &[], &no_centroids());
        assert!(
            b.categories["economic"].score >= a.categories["economic"].score,
            "adding an occurrence decreased the score"
        );
    }

    #[test]
    fn test_semantic_top5_mean() {
        let banks = default_indicators();
        let doc = document("texto");
        let mut centroids = BTreeMap::new();
        centroids.insert("technical".to_string(), vec![1.0, 0.0]);

        // Seven fragments with descending similarity; only the top five count
        let fragments: Vec<Fragment> = (0..7)
            .map(|i| {
                let x = 1.0 - i as f32 * 0.1;
                fragment(i, &format!("fragmento {}", i), vec![x, (1.0 - x * x).max(0.0).sqrt()])
            })
            .collect();

        let assessment = assess(&banks, &doc, &fragments, &centroids);
        let technical = &assessment.categories["technical"];
        assert_eq!(technical.semantic_risks.len(), 5);
        assert_eq!(technical.semantic_risks[0].fragment_ordinal, 0);
        // Mean of cos similarities of the five closest fragments
        let expected: f32 = (0..5)
            .map(|i| 1.0 - i as f32 * 0.1)
            .sum::<f32>()
            / 5.0;
        let mean = technical.semantic_risks.iter().map(|s| s.similarity).sum::<f32>() / 5.0;
        assert!((mean - expected).abs() < 1e-3);
    }

    #[test]
    fn test_score_is_capped() {
        let banks = default_indicators();
        let doc = document(&"sobrecosto fluctuación inflación retención ".repeat(100));
        let assessment = assess(&banks, &doc, &[], &no_centroids());
        assert!(assessment.categories["economic"].score <= 100.0);
        assert_eq!(
            assessment.categories["economic"].level,
            RiskLevel::VeryHigh
        );
    }

    #[test]
    fn test_mitigations_follow_fired_indicators() {
        let banks = default_indicators();
        let doc = document("El suministro depende de un proveedor único para el acero.");
        let assessment = assess(&banks, &doc, &[], &no_centroids());

        assert!(assessment
            .mitigations
            .iter()
            .any(|m| m.contains("alternate supplier")));
        // Indicator-specific template for an indicator that did not fire
        assert!(!assessment
            .mitigations
            .iter()
            .any(|m| m.contains("long-lead imported items")));
    }

    #[test]
    fn test_matrix_buckets_cover_all_categories() {
        let banks = default_indicators();
        let doc = document("Contrato sin señales de alarma particulares.");
        let assessment = assess(&banks, &doc, &[], &no_centroids());
        let total = assessment.matrix.low.len()
            + assessment.matrix.medium.len()
            + assessment.matrix.high.len();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_score(10.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(90.0), RiskLevel::VeryHigh);
        assert!(RiskLevel::High.at_least_high());
        assert!(!RiskLevel::Medium.at_least_high());
    }
}
