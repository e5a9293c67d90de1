//! Document identity and fragment types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// Declared or detected tender document type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Tender specification (pliego de condiciones)
    Pliego,
    /// Contractor proposal
    Propuesta,
    /// Contract
    Contrato,
    /// Could not be determined
    Desconocido,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Pliego => "pliego",
            DocType::Propuesta => "propuesta",
            DocType::Contrato => "contrato",
            DocType::Desconocido => "desconocido",
        }
    }

    /// Parse a user-supplied type string; anything unrecognized is Desconocido
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "pliego" | "specification" | "spec" => DocType::Pliego,
            "propuesta" | "proposal" => DocType::Propuesta,
            "contrato" | "contract" => DocType::Contrato,
            _ => DocType::Desconocido,
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable content fingerprint: SHA-256 over the canonicalized text
/// prefixed by the declared type. Identical content uploaded twice with
/// the same declared type yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Compute the fingerprint for a document
    pub fn fingerprint(declared: DocType, text: &str) -> Self {
        let canonical = canonicalize_text(text);
        let mut hasher = Sha256::new();
        hasher.update(declared.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(canonical.as_bytes());
        DocId(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already-computed fingerprint (e.g. from a persisted artifact)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        DocId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Analysis depth requested for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisLevel {
    Basic,
    Comprehensive,
}

impl AnalysisLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisLevel::Basic => "basic",
            AnalysisLevel::Comprehensive => "comprehensive",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "comprehensive" | "full" => AnalysisLevel::Comprehensive,
            _ => AnalysisLevel::Basic,
        }
    }
}

impl std::fmt::Display for AnalysisLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of the stage machine: a document at an analysis level
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(doc_id: &DocId, level: AnalysisLevel) -> Self {
        RunId(format!("{}-{}", doc_id.as_str(), level.as_str()))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        RunId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ingested document, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: DocId,
    pub path: PathBuf,
    pub declared_type: DocType,
    pub detected_type: DocType,
    /// Canonicalized full text
    pub text: String,
    pub page_count: Option<usize>,
    pub table_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Effective type for rule lookups: the detected type unless unknown
    pub fn effective_type(&self) -> DocType {
        if self.detected_type == DocType::Desconocido {
            self.declared_type
        } else {
            self.detected_type
        }
    }
}

/// A chunk of document text produced by the chunker, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    pub doc_id: DocId,
    /// Dense 0-based sequence per document
    pub ordinal: usize,
    pub text: String,
    /// Character span within the canonicalized source text
    pub char_span: (usize, usize),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_confidence: Option<f32>,
}

/// Normalize text so fingerprints are stable across re-upload: CRLF to
/// LF, trailing whitespace stripped per line, outer blank lines trimmed.
pub fn canonicalize_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let trimmed: Vec<&str> = normalized.lines().map(|l| l.trim_end()).collect();
    trimmed.join("\n").trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stability() {
        let a = DocId::fingerprint(DocType::Propuesta, "Oferta técnica.\r\nPlazo: 90 días.  ");
        let b = DocId::fingerprint(DocType::Propuesta, "Oferta técnica.\nPlazo: 90 días.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_depends_on_declared_type() {
        let text = "Contenido idéntico";
        let a = DocId::fingerprint(DocType::Pliego, text);
        let b = DocId::fingerprint(DocType::Contrato, text);
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonicalize_strips_outer_blank_lines() {
        let text = "\n\n  hola  \nmundo\t\n\n";
        assert_eq!(canonicalize_text(text), "  hola\nmundo");
    }

    #[test]
    fn test_run_id_combines_doc_and_level() {
        let doc = DocId::from_raw("abc123");
        let run = RunId::new(&doc, AnalysisLevel::Comprehensive);
        assert_eq!(run.as_str(), "abc123-comprehensive");
    }

    #[test]
    fn test_doc_type_parse() {
        assert_eq!(DocType::parse("Proposal"), DocType::Propuesta);
        assert_eq!(DocType::parse("PLIEGO"), DocType::Pliego);
        assert_eq!(DocType::parse("weird"), DocType::Desconocido);
    }
}
