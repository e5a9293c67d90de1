//! Validation agent: structural, compliance and date coherence checks

use crate::agents::{stage, AnalysisAgent, ClassificationResult, StageData, StageInput};
use crate::catalog::{Catalog, RulePredicate};
use crate::config::ValidationConfig;
use crate::context::AnalysisContext;
use crate::document::{DocId, DocType, Document};
use crate::error::{Result, StageError};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Sub-validator weights in the overall score
const STRUCTURAL_WEIGHT: f32 = 0.4;
const COMPLIANCE_WEIGHT: f32 = 0.4;
const DATES_WEIGHT: f32 = 0.2;

/// Validation verdict bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationLevel {
    #[serde(rename = "APROBADO")]
    Aprobado,
    #[serde(rename = "APROBADO_CON_OBSERVACIONES")]
    AprobadoConObservaciones,
    #[serde(rename = "RECHAZADO")]
    Rechazado,
}

impl ValidationLevel {
    pub fn from_score(score: f32) -> Self {
        if score >= 80.0 {
            ValidationLevel::Aprobado
        } else if score >= 50.0 {
            ValidationLevel::AprobadoConObservaciones
        } else {
            ValidationLevel::Rechazado
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Aprobado => "APROBADO",
            ValidationLevel::AprobadoConObservaciones => "APROBADO_CON_OBSERVACIONES",
            ValidationLevel::Rechazado => "RECHAZADO",
        }
    }
}

/// Compliance bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceLevel {
    Low,
    Medium,
    High,
}

impl ComplianceLevel {
    pub fn from_pct(pct: f32) -> Self {
        if pct >= 0.8 {
            ComplianceLevel::High
        } else if pct >= 0.5 {
            ComplianceLevel::Medium
        } else {
            ComplianceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceLevel::Low => "low",
            ComplianceLevel::Medium => "medium",
            ComplianceLevel::High => "high",
        }
    }
}

/// Full validation output; a pure function of the classification
/// result, document type and rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub doc_id: DocId,
    pub overall_score: f32,
    pub level: ValidationLevel,
    pub structural: StructuralReport,
    pub compliance: ComplianceReport,
    pub dates: DateReport,
    pub recommendations: Vec<String>,
    pub summary: String,
}

/// Structural completeness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralReport {
    pub required_sections: Vec<String>,
    pub found_sections: Vec<String>,
    pub missing: Vec<String>,
    pub completion_pct: f32,
    pub has_dates: bool,
    pub adequate_length: bool,
    pub total_chars: usize,
    pub score: f32,
}

/// Rule-based compliance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub rules_checked: usize,
    pub rules_passed: usize,
    pub by_category: BTreeMap<String, CategoryCompliance>,
    pub overall_pct: f32,
    pub level: ComplianceLevel,
    pub score: f32,
}

/// Per-category rule outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCompliance {
    pub pct: f32,
    pub missing: Vec<String>,
    pub found: Vec<String>,
}

/// Date coverage and coherence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateReport {
    pub count: usize,
    pub deadlines: usize,
    pub samples: Vec<String>,
    pub issues: Vec<String>,
    pub has_adequate_dates: bool,
    pub score: f32,
}

/// The validation agent
pub struct ValidationAgent;

#[async_trait]
impl AnalysisAgent for ValidationAgent {
    fn name(&self) -> &'static str {
        "validator"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[stage::CLASSIFYING]
    }

    fn produces(&self) -> &'static str {
        stage::VALIDATING
    }

    async fn run(&self, ctx: &AnalysisContext, input: &StageInput<'_>) -> Result<StageData> {
        let classification = input.classification.ok_or_else(|| StageError::MissingInput {
            stage: stage::VALIDATING.to_string(),
            input: "classification result".to_string(),
        })?;

        input.progress.begin(3);
        input.cancel.check(stage::VALIDATING)?;

        let record = evaluate(
            &ctx.catalog,
            &ctx.config.validation,
            input.document,
            classification,
            &input.progress,
        );
        input.progress.finish();

        debug!(
            "Validation of {}: {:.1}/100 ({})",
            input.document.doc_id.short(),
            record.overall_score,
            record.level.as_str()
        );

        Ok(StageData::Validation(record))
    }
}

/// Deterministic validation: same classification, document type and
/// rule set always reproduce the same record
pub fn evaluate(
    catalog: &Catalog,
    config: &ValidationConfig,
    document: &Document,
    classification: &ClassificationResult,
    progress: &crate::agents::StageProgress,
) -> ValidationRecord {
    let doc_type = document.effective_type();
    let rule_set = catalog.rules.for_type(doc_type);

    let dates = check_dates(&document.text);
    progress.tick();

    let structural = check_structure(catalog, config, document, classification, dates.count > 0);
    progress.tick();

    let compliance = check_compliance(catalog, document, classification);
    progress.tick();

    let overall_score = (STRUCTURAL_WEIGHT * structural.score
        + COMPLIANCE_WEIGHT * compliance.score
        + DATES_WEIGHT * dates.score)
        .clamp(0.0, 100.0);
    let level = ValidationLevel::from_score(overall_score);

    let mut recommendations = Vec::new();
    for missing in &structural.missing {
        if let Some(section) = catalog.taxonomy.section(missing) {
            recommendations.push(section.remediation.clone());
        }
    }
    for rule in &rule_set.rules {
        let failed = compliance
            .by_category
            .get(&rule.category)
            .map(|c| c.missing.contains(&rule.id))
            .unwrap_or(false);
        if failed {
            recommendations.push(rule.remediation.clone());
        }
    }
    if !dates.has_adequate_dates {
        recommendations.push(
            "Add at least three concrete dates and one explicit delivery deadline so the schedule can be validated".to_string(),
        );
    }
    if !structural.adequate_length {
        recommendations.push(format!(
            "The document is too short for a {} ({} chars); develop the required sections",
            doc_type, structural.total_chars
        ));
    }

    let summary = format!(
        "{}: {:.0}/100. Sections {}/{}, compliance {:.0}% ({}), {} dates with {} deadlines.",
        level.as_str(),
        overall_score,
        structural.found_sections.len(),
        structural.required_sections.len(),
        compliance.overall_pct * 100.0,
        compliance.level.as_str(),
        dates.count,
        dates.deadlines,
    );

    ValidationRecord {
        doc_id: document.doc_id.clone(),
        overall_score,
        level,
        structural,
        compliance,
        dates,
        recommendations,
        summary,
    }
}

fn check_structure(
    catalog: &Catalog,
    config: &ValidationConfig,
    document: &Document,
    classification: &ClassificationResult,
    has_dates: bool,
) -> StructuralReport {
    let rule_set = catalog.rules.for_type(document.effective_type());
    let required_sections = rule_set.required_sections.clone();
    let found: Vec<String> = classification
        .found_sections()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let missing: Vec<String> = required_sections
        .iter()
        .filter(|r| !found.contains(r))
        .cloned()
        .collect();

    let completion_pct = if required_sections.is_empty() {
        1.0
    } else {
        (required_sections.len() - missing.len()) as f32 / required_sections.len() as f32
    };

    let total_chars = document.text.chars().count();
    let min_chars = match document.effective_type() {
        DocType::Pliego => config.min_chars_pliego,
        DocType::Propuesta => config.min_chars_propuesta,
        DocType::Contrato => config.min_chars_contrato,
        DocType::Desconocido => config.min_chars_desconocido,
    };
    let adequate_length = total_chars >= min_chars;

    let score = 70.0 * completion_pct
        + if has_dates { 15.0 } else { 0.0 }
        + if adequate_length { 15.0 } else { 0.0 };

    StructuralReport {
        required_sections,
        found_sections: found,
        missing,
        completion_pct,
        has_dates,
        adequate_length,
        total_chars,
        score,
    }
}

fn check_compliance(
    catalog: &Catalog,
    document: &Document,
    classification: &ClassificationResult,
) -> ComplianceReport {
    let rule_set = catalog.rules.for_type(document.effective_type());
    let lower = document.text.to_lowercase();

    let mut by_category: BTreeMap<String, CategoryCompliance> = BTreeMap::new();
    let mut rules_checked = 0usize;
    let mut rules_passed = 0usize;

    for rule in &rule_set.rules {
        let passed = match &rule.predicate {
            RulePredicate::Regex { pattern } => match Regex::new(pattern) {
                Ok(regex) => regex.is_match(&document.text),
                Err(e) => {
                    warn!("Invalid compliance pattern in rule {}: {}", rule.id, e);
                    continue;
                }
            },
            RulePredicate::Keywords { any, min_hits } => {
                let hits = any
                    .iter()
                    .filter(|term| lower.contains(&term.to_lowercase()))
                    .count();
                hits >= *min_hits
            }
            RulePredicate::SectionPresent { section } => {
                classification.sections.contains_key(section)
            }
        };

        rules_checked += 1;
        let entry = by_category
            .entry(rule.category.clone())
            .or_insert_with(|| CategoryCompliance {
                pct: 0.0,
                missing: Vec::new(),
                found: Vec::new(),
            });
        if passed {
            rules_passed += 1;
            entry.found.push(rule.id.clone());
        } else {
            entry.missing.push(rule.id.clone());
        }
    }

    for compliance in by_category.values_mut() {
        let total = compliance.found.len() + compliance.missing.len();
        compliance.pct = if total == 0 {
            1.0
        } else {
            compliance.found.len() as f32 / total as f32
        };
    }

    let overall_pct = if rules_checked == 0 {
        1.0
    } else {
        rules_passed as f32 / rules_checked as f32
    };

    ComplianceReport {
        rules_checked,
        rules_passed,
        by_category,
        overall_pct,
        level: ComplianceLevel::from_pct(overall_pct),
        score: overall_pct * 100.0,
    }
}

/// Date patterns: absolute, written-out, relative, plus deadline verbs
fn date_patterns() -> (Vec<Regex>, Regex, Regex) {
    let absolute = vec![
        Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{4}\b").expect("static regex"),
        Regex::new(
            r"(?i)\b\d{1,2}\s+de\s+(?:enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre)(?:\s+de\s+\d{4})?",
        )
        .expect("static regex"),
        Regex::new(r"(?i)\b(?:dentro de|en un plazo de|plazo m[aá]ximo de)\s+\d+\s+d[ií]as")
            .expect("static regex"),
    ];
    let deadline = Regex::new(
        r"(?i)\b(?:fecha l[ií]mite|plazo m[aá]ximo|vence|vencimiento|a m[aá]s tardar|deber[aá]\s+entregarse|hasta el)\b",
    )
    .expect("static regex");
    let range = Regex::new(
        r"(?i)(?:desde|del)\s+(\d{1,2}[/-]\d{1,2}[/-]\d{4})\s+(?:hasta el|hasta|al)\s+(\d{1,2}[/-]\d{1,2}[/-]\d{4})",
    )
    .expect("static regex");
    (absolute, deadline, range)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    for format in ["%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    None
}

fn check_dates(text: &str) -> DateReport {
    let (absolute, deadline, range) = date_patterns();

    let mut distinct: Vec<String> = Vec::new();
    for pattern in &absolute {
        for m in pattern.find_iter(text) {
            let normalized = m.as_str().to_lowercase();
            if !distinct.contains(&normalized) {
                distinct.push(normalized);
            }
        }
    }

    let deadlines = deadline.find_iter(text).count();
    let mut issues = Vec::new();

    // Contradictory ranges: start after end
    for captures in range.captures_iter(text) {
        if let (Some(start), Some(end)) = (
            captures.get(1).and_then(|m| parse_date(m.as_str())),
            captures.get(2).and_then(|m| parse_date(m.as_str())),
        ) {
            if start > end {
                issues.push(format!(
                    "contradictory range: {} ends before it starts ({} > {})",
                    &captures[0], start, end
                ));
            }
        }
    }

    // Deadlines anchored to a date that already passed
    for m in deadline.find_iter(text) {
        let window_end = (m.end() + 48).min(text.len());
        let window_end = (m.end()..=window_end)
            .rev()
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(m.end());
        let window = &text[m.end()..window_end];
        for pattern in &absolute[..1] {
            for date_match in pattern.find_iter(window) {
                if let Some(date) = parse_date(date_match.as_str()) {
                    // Clearly historical deadlines only; the analysis
                    // date itself is not part of the record
                    if date.year() < 2020 {
                        issues.push(format!("past-dated deadline: {}", date_match.as_str()));
                    }
                }
            }
        }
    }

    let count = distinct.len();
    let has_adequate_dates = count >= 3 && deadlines >= 1;

    let mut score = 20.0 * count.min(3) as f32 + if deadlines > 0 { 40.0 } else { 0.0 };
    score -= 10.0 * issues.len() as f32;
    let score = score.clamp(0.0, 100.0);

    let samples = distinct.iter().take(5).cloned().collect();

    DateReport {
        count,
        deadlines,
        samples,
        issues,
        has_adequate_dates,
        score,
    }
}
