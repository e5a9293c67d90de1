//! Classification agent: assigns fragments to the 9-section taxonomy

use crate::agents::{stage, AnalysisAgent, StageData, StageInput};
use crate::catalog::UNCLASSIFIED;
use crate::context::{AnalysisContext, SECTION_SEEDS};
use crate::document::DocId;
use crate::embedding::{centroid, cosine_similarity};
use crate::error::{Result, StageError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Weight of the keyword pre-score in the combined score (alpha)
pub const KEYWORD_WEIGHT: f32 = 0.4;

/// Softmax temperature over the section scores (tau)
const SOFTMAX_TEMPERATURE: f32 = 0.5;

/// Below this confidence a fragment is left unclassified
const MIN_CONFIDENCE: f32 = 0.25;

/// Per-document classification output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub doc_id: DocId,
    /// Section key -> aggregate summary; only sections that claimed
    /// at least one fragment appear, plus "unclassified" when used
    pub sections: BTreeMap<String, SectionSummary>,
    /// Per-fragment assignment in ordinal order
    pub assignments: Vec<FragmentAssignment>,
    /// Section key -> de-duplicated key requirements
    pub key_requirements: BTreeMap<String, Vec<String>>,
    /// Section key -> mean fragment vector, kept for comparison
    pub section_centroids: BTreeMap<String, Vec<f32>>,
}

impl ClassificationResult {
    /// Keys of the sections found in the document (excluding unclassified)
    pub fn found_sections(&self) -> Vec<&str> {
        self.sections
            .keys()
            .filter(|k| k.as_str() != UNCLASSIFIED)
            .map(|k| k.as_str())
            .collect()
    }

    /// Total characters across all fragments
    pub fn total_chars(&self) -> usize {
        self.sections.values().map(|s| s.total_chars).sum()
    }
}

/// Aggregate summary for one section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSummary {
    pub fragment_ids: Vec<Uuid>,
    pub fragment_count: usize,
    pub total_chars: usize,
    /// The three highest-frequency taxonomy keywords observed
    pub top_keywords: Vec<String>,
    pub mean_confidence: f32,
}

/// Assignment of one fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentAssignment {
    pub fragment_id: Uuid,
    pub ordinal: usize,
    pub section: String,
    pub confidence: f32,
    /// Softmax distribution over the 9 sections plus unclassified;
    /// sums to 1
    pub distribution: BTreeMap<String, f32>,
}

/// The classification agent
pub struct ClassificationAgent;

#[async_trait]
impl AnalysisAgent for ClassificationAgent {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[stage::CHUNKING]
    }

    fn produces(&self) -> &'static str {
        stage::CLASSIFYING
    }

    async fn run(&self, ctx: &AnalysisContext, input: &StageInput<'_>) -> Result<StageData> {
        let taxonomy = &ctx.catalog.taxonomy;

        // Section seed centroids, computed once at startup
        let mut seed_centroids: BTreeMap<String, Vec<f32>> = BTreeMap::new();
        for section in &taxonomy.sections {
            let item = ctx
                .store
                .get(SECTION_SEEDS, &section.key)
                .await?
                .ok_or_else(|| StageError::MissingInput {
                    stage: stage::CLASSIFYING.to_string(),
                    input: format!("seed centroid for section '{}'", section.key),
                })?;
            seed_centroids.insert(section.key.clone(), item.vector);
        }

        input.progress.begin(input.fragments.len());
        let mut assignments = Vec::with_capacity(input.fragments.len());

        for fragment in input.fragments {
            input.cancel.check(stage::CLASSIFYING)?;

            let vector = fragment.vector.as_ref().ok_or_else(|| StageError::MissingInput {
                stage: stage::CLASSIFYING.to_string(),
                input: format!("vector for fragment {}", fragment.ordinal),
            })?;

            let lower = fragment.text.to_lowercase();
            let mut combined: BTreeMap<String, f32> = BTreeMap::new();

            for section in &taxonomy.sections {
                let present = section
                    .keywords
                    .iter()
                    .filter(|k| lower.contains(&k.to_lowercase()))
                    .count();
                let keyword_score = present as f32 / section.keywords.len() as f32;

                let semantic_score = seed_centroids
                    .get(&section.key)
                    .map(|c| cosine_similarity(vector, c).max(0.0))
                    .unwrap_or(0.0);

                combined.insert(
                    section.key.clone(),
                    KEYWORD_WEIGHT * keyword_score + (1.0 - KEYWORD_WEIGHT) * semantic_score,
                );
            }

            let mut distribution = softmax(&combined, SOFTMAX_TEMPERATURE);
            let (best_section, best_confidence) = distribution
                .iter()
                .max_by(|a, b| {
                    a.1.partial_cmp(b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.cmp(a.0))
                })
                .map(|(k, v)| (k.clone(), *v))
                .expect("taxonomy is never empty");

            // The unclassified slot is part of the closed distribution
            distribution.insert(UNCLASSIFIED.to_string(), 0.0);

            let section = if best_confidence < MIN_CONFIDENCE {
                UNCLASSIFIED.to_string()
            } else {
                best_section
            };

            assignments.push(FragmentAssignment {
                fragment_id: fragment.id,
                ordinal: fragment.ordinal,
                section,
                confidence: best_confidence,
                distribution,
            });
            input.progress.tick();
        }

        let sections = summarize(taxonomy, input, &assignments);
        let key_requirements = extract_requirements(ctx, input, &assignments);
        let section_centroids = section_centroids(input, &assignments);
        input.progress.finish();

        debug!(
            "Classified {} fragments into {} sections for {}",
            assignments.len(),
            sections.len(),
            input.document.doc_id.short()
        );

        Ok(StageData::Classification(ClassificationResult {
            doc_id: input.document.doc_id.clone(),
            sections,
            assignments,
            key_requirements,
            section_centroids,
        }))
    }
}

/// Softmax with temperature over a score map
fn softmax(scores: &BTreeMap<String, f32>, temperature: f32) -> BTreeMap<String, f32> {
    let max = scores.values().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: BTreeMap<String, f32> = scores
        .iter()
        .map(|(k, v)| (k.clone(), ((v - max) / temperature).exp()))
        .collect();
    let sum: f32 = exps.values().sum();
    exps.into_iter().map(|(k, v)| (k, v / sum)).collect()
}

/// Build per-section aggregates from the assignments
fn summarize(
    taxonomy: &crate::catalog::Taxonomy,
    input: &StageInput<'_>,
    assignments: &[FragmentAssignment],
) -> BTreeMap<String, SectionSummary> {
    let mut sections: BTreeMap<String, SectionSummary> = BTreeMap::new();

    for assignment in assignments {
        let fragment = &input.fragments[assignment.ordinal];
        let entry = sections
            .entry(assignment.section.clone())
            .or_insert_with(|| SectionSummary {
                fragment_ids: Vec::new(),
                fragment_count: 0,
                total_chars: 0,
                top_keywords: Vec::new(),
                mean_confidence: 0.0,
            });
        entry.fragment_ids.push(fragment.id);
        entry.fragment_count += 1;
        entry.total_chars += fragment.text.chars().count();
        entry.mean_confidence += assignment.confidence;
    }

    for (key, summary) in sections.iter_mut() {
        summary.mean_confidence /= summary.fragment_count.max(1) as f32;

        // Top-3 taxonomy keywords by occurrence across the section's fragments
        if let Some(def) = taxonomy.section(key) {
            let mut counts: Vec<(usize, &String)> = def
                .keywords
                .iter()
                .map(|keyword| {
                    let needle = keyword.to_lowercase();
                    let count = assignments
                        .iter()
                        .filter(|a| &a.section == key)
                        .map(|a| input.fragments[a.ordinal].text.to_lowercase().matches(&needle).count())
                        .sum::<usize>();
                    (count, keyword)
                })
                .filter(|(count, _)| *count > 0)
                .collect();
            counts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
            summary.top_keywords = counts.into_iter().take(3).map(|(_, k)| k.clone()).collect();
        }
    }

    sections
}

/// Extract key requirements with the taxonomy's per-section regexes,
/// de-duplicated by normalized text
fn extract_requirements(
    ctx: &AnalysisContext,
    input: &StageInput<'_>,
    assignments: &[FragmentAssignment],
) -> BTreeMap<String, Vec<String>> {
    let mut requirements: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for section in &ctx.catalog.taxonomy.sections {
        let mut found: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        for pattern in &section.requirement_patterns {
            let regex = match Regex::new(pattern) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Invalid requirement pattern for {}: {}", section.key, e);
                    continue;
                }
            };

            for assignment in assignments.iter().filter(|a| a.section == section.key) {
                let fragment = &input.fragments[assignment.ordinal];
                for m in regex.find_iter(&fragment.text) {
                    let text = m.as_str().trim().to_string();
                    let normalized = normalize_requirement(&text);
                    if !seen.contains(&normalized) {
                        seen.push(normalized);
                        found.push(text);
                    }
                }
            }
        }

        if !found.is_empty() {
            requirements.insert(section.key.clone(), found);
        }
    }

    requirements
}

fn normalize_requirement(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Mean fragment vector per section
fn section_centroids(
    input: &StageInput<'_>,
    assignments: &[FragmentAssignment],
) -> BTreeMap<String, Vec<f32>> {
    let mut grouped: BTreeMap<String, Vec<Vec<f32>>> = BTreeMap::new();
    for assignment in assignments {
        if let Some(vector) = &input.fragments[assignment.ordinal].vector {
            grouped
                .entry(assignment.section.clone())
                .or_default()
                .push(vector.clone());
        }
    }

    grouped
        .into_iter()
        .filter_map(|(key, vectors)| centroid(&vectors).map(|c| (key, c)))
        .collect()
}
