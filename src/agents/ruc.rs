//! RUC validator: contractor-ID extraction, checksum and registry checks

use crate::agents::{stage, AnalysisAgent, StageData, StageInput};
use crate::context::AnalysisContext;
use crate::document::DocId;
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Score share of a checksum-valid format
const FORMAT_WEIGHT: f32 = 40.0;

/// Score share of a positive registry verification
const VERIFIED_WEIGHT: f32 = 30.0;

/// Score share of an activity compatible with construction works
const ACTIVITY_WEIGHT: f32 = 30.0;

/// Quality bands for contractor identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RucBucket {
    #[serde(rename = "EXCELENTE")]
    Excelente,
    #[serde(rename = "BUENO")]
    Bueno,
    #[serde(rename = "DEFICIENTE")]
    Deficiente,
}

impl RucBucket {
    pub fn from_score(score: f32) -> Self {
        if score >= 80.0 {
            RucBucket::Excelente
        } else if score >= 60.0 {
            RucBucket::Bueno
        } else {
            RucBucket::Deficiente
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RucBucket::Excelente => "EXCELENTE",
            RucBucket::Bueno => "BUENO",
            RucBucket::Deficiente => "DEFICIENTE",
        }
    }
}

/// Per-document RUC record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RucRecord {
    pub doc_id: DocId,
    pub found: Vec<RucCandidate>,
    /// Best candidate's blended score; 0 when none found
    pub score: f32,
    pub bucket: RucBucket,
}

/// One extracted contractor-ID candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RucCandidate {
    pub raw: String,
    pub normalized: String,
    pub checksum_valid: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility_score: Option<f32>,
}

impl RucCandidate {
    fn blended_score(&self) -> f32 {
        let format = if self.checksum_valid { FORMAT_WEIGHT } else { 0.0 };
        let verified = if self.verified { VERIFIED_WEIGHT } else { 0.0 };
        let activity = self.compatibility_score.unwrap_or(0.0) * ACTIVITY_WEIGHT;
        format + verified + activity
    }
}

/// Registry adapter contract; implementations call the national
/// taxpayer registry. Absence of an adapter never fails the record.
#[async_trait]
pub trait ContractorRegistry: Send + Sync {
    async fn lookup(&self, ruc: &str) -> Result<Option<RegistryEntry>>;
}

/// Registry lookup result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub active: bool,
    pub activity: String,
}

/// The RUC validation agent
pub struct RucAgent;

#[async_trait]
impl AnalysisAgent for RucAgent {
    fn name(&self) -> &'static str {
        "ruc"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[stage::CLASSIFYING]
    }

    fn produces(&self) -> &'static str {
        stage::RUC
    }

    async fn run(&self, ctx: &AnalysisContext, input: &StageInput<'_>) -> Result<StageData> {
        let raw_candidates = extract_candidates(&input.document.text);
        input.progress.begin(raw_candidates.len().max(1));

        let mut found = Vec::with_capacity(raw_candidates.len());
        for (raw, normalized) in raw_candidates {
            input.cancel.check(stage::RUC)?;

            let checksum = checksum_valid(&normalized);
            let mut candidate = RucCandidate {
                raw,
                normalized,
                checksum_valid: checksum,
                verified: false,
                activity: None,
                compatibility_score: None,
            };

            if checksum {
                if let Some(registry) = &ctx.registry {
                    match registry.lookup(&candidate.normalized).await {
                        Ok(Some(entry)) => {
                            candidate.verified = entry.active;
                            candidate.compatibility_score =
                                Some(activity_compatibility(&entry.activity));
                            candidate.activity = Some(entry.activity);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // Registry trouble degrades verification, not the record
                            warn!("Registry lookup failed for {}: {}", candidate.normalized, e);
                        }
                    }
                }
            }

            found.push(candidate);
            input.progress.tick();
        }
        input.progress.finish();

        let score = found
            .iter()
            .map(RucCandidate::blended_score)
            .fold(0.0f32, f32::max);
        let bucket = RucBucket::from_score(score);

        debug!(
            "RUC check for {}: {} candidates, score {:.0} ({})",
            input.document.doc_id.short(),
            found.len(),
            score,
            bucket.as_str()
        );

        Ok(StageData::Ruc(RucRecord {
            doc_id: input.document.doc_id.clone(),
            found,
            score,
            bucket,
        }))
    }
}

/// Extract 13-digit sequences with optional separators, de-duplicated
/// by normalized digits, in order of first appearance
pub fn extract_candidates(text: &str) -> Vec<(String, String)> {
    let pattern = Regex::new(r"\b\d[\d.\- ]{11,18}\d\b").expect("static regex");
    let mut seen = Vec::new();
    let mut out = Vec::new();

    for m in pattern.find_iter(text) {
        let raw = m.as_str().trim().to_string();
        let normalized: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if normalized.len() == 13 && !seen.contains(&normalized) {
            seen.push(normalized.clone());
            out.push((raw, normalized));
        }
    }

    out
}

/// Modulus-11 checksum family of the national taxpayer registry,
/// keyed on the third digit: 0-5 natural persons (mod 10), 6 public
/// entities, 9 private juridical entities. The trailing establishment
/// suffix must be at least 001 (0001 for public entities).
pub fn checksum_valid(ruc: &str) -> bool {
    if ruc.len() != 13 || !ruc.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let digits: Vec<u32> = ruc.chars().map(|c| c.to_digit(10).unwrap()).collect();

    let province = digits[0] * 10 + digits[1];
    if !(1..=24).contains(&province) && province != 30 {
        return false;
    }

    match digits[2] {
        0..=5 => {
            // Natural person: mod-10 with alternating coefficients
            let sum: u32 = digits[..9]
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    let product = d * if i % 2 == 0 { 2 } else { 1 };
                    if product > 9 {
                        product - 9
                    } else {
                        product
                    }
                })
                .sum();
            let check = (10 - sum % 10) % 10;
            digits[9] == check && suffix_at_least_one(&digits[10..])
        }
        6 => {
            // Public entity: 8 significant digits, check at position 9
            const COEFFICIENTS: [u32; 8] = [3, 2, 7, 6, 5, 4, 3, 2];
            let sum: u32 = digits[..8]
                .iter()
                .zip(COEFFICIENTS.iter())
                .map(|(d, c)| d * c)
                .sum();
            let remainder = sum % 11;
            let check = if remainder == 0 { 0 } else { 11 - remainder };
            if check == 10 {
                return false;
            }
            digits[8] == check && suffix_at_least_one(&digits[9..])
        }
        9 => {
            // Private juridical entity: 9 significant digits, check at 10
            const COEFFICIENTS: [u32; 9] = [4, 3, 2, 7, 6, 5, 4, 3, 2];
            let sum: u32 = digits[..9]
                .iter()
                .zip(COEFFICIENTS.iter())
                .map(|(d, c)| d * c)
                .sum();
            let remainder = sum % 11;
            let check = if remainder == 0 { 0 } else { 11 - remainder };
            if check == 10 {
                return false;
            }
            digits[9] == check && suffix_at_least_one(&digits[10..])
        }
        _ => false,
    }
}

fn suffix_at_least_one(suffix: &[u32]) -> bool {
    suffix.iter().any(|d| *d > 0)
}

/// Compatibility of a registry activity with construction works
fn activity_compatibility(activity: &str) -> f32 {
    const CONSTRUCTION_TERMS: [&str; 6] = [
        "construc",
        "obra",
        "ingenier",
        "infraestructura",
        "edificac",
        "inmobiliar",
    ];
    let lower = activity.to_lowercase();
    if CONSTRUCTION_TERMS.iter().any(|t| lower.contains(t)) {
        1.0
    } else {
        0.0
    }
}
