//! Document extraction: normalize input artifacts to plain text

use crate::config::ExtractConfig;
use crate::document::{canonicalize_text, DocType};
use crate::error::{InputError, Result};
use regex::Regex;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extraction output: canonicalized text plus whatever structural
/// metadata the source format exposes
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub page_count: Option<usize>,
    pub table_count: Option<usize>,
    pub detected_type: DocType,
}

/// Normalizes PDF, DOCX, XLS/XLSX and TXT artifacts to plain text.
///
/// PDFs use embedded text first; the OCR command only runs when the
/// per-page text density falls below the configured threshold. Office
/// formats are converted out-of-process; a failed conversion is an
/// `UnsupportedArtifact` error, never silently empty text.
pub struct DocumentExtractor {
    config: ExtractConfig,
}

impl DocumentExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Extract a document by path, dispatching on the file extension
    pub async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        let (raw_text, page_count) = match extension.as_str() {
            "txt" | "text" | "md" => (tokio::fs::read_to_string(path).await?, None),
            "pdf" => self.extract_pdf(path).await?,
            "docx" | "doc" | "xls" | "xlsx" => (self.convert_out_of_process(path).await?, None),
            other => {
                return Err(InputError::UnsupportedArtifact(format!(
                    "unknown extension '{}' for {}",
                    other,
                    path.display()
                ))
                .into());
            }
        };

        let text = canonicalize_text(&raw_text);
        if text.is_empty() {
            return Err(InputError::EmptyDocument(path.display().to_string()).into());
        }

        let detected_type = detect_doc_type(&text);
        let table_count = count_table_captions(&text);
        info!(
            "Extracted {} chars from {} (type {}, {} pages)",
            text.len(),
            path.display(),
            detected_type,
            page_count.map_or("?".to_string(), |p| p.to_string()),
        );

        Ok(ExtractedDocument {
            text,
            page_count,
            table_count,
            detected_type,
        })
    }

    #[cfg(feature = "pdf")]
    async fn extract_pdf(&self, path: &Path) -> Result<(String, Option<usize>)> {
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
            .await
            .map_err(|e| anyhow::anyhow!("pdf extraction task failed: {}", e))?
            .map_err(|e| InputError::UnsupportedArtifact(format!("pdf: {}", e)))?;

        let page_count = lopdf::Document::load(path)
            .ok()
            .map(|doc| doc.get_pages().len());

        // Embedded text first; OCR only when the page density is too low
        if let Some(pages) = page_count {
            let density = text.chars().filter(|c| !c.is_whitespace()).count() / pages.max(1);
            if density < self.config.page_text_density_threshold {
                if self.config.ocr_command.is_some() {
                    debug!(
                        "Text density {} below threshold {}, running OCR on {}",
                        density,
                        self.config.page_text_density_threshold,
                        path.display()
                    );
                    let ocr_text = self.run_ocr(path).await?;
                    if !ocr_text.trim().is_empty() {
                        return Ok((ocr_text, page_count));
                    }
                } else {
                    warn!(
                        "Low text density ({} chars/page) in {} and no OCR command configured",
                        density,
                        path.display()
                    );
                }
            }
        }

        Ok((text, page_count))
    }

    #[cfg(not(feature = "pdf"))]
    async fn extract_pdf(&self, path: &Path) -> Result<(String, Option<usize>)> {
        Err(InputError::UnsupportedArtifact(format!(
            "pdf support not compiled in: {}",
            path.display()
        ))
        .into())
    }

    /// Convert an office document via the configured external command.
    /// The command receives the source path and an output directory and
    /// must produce `<stem>.txt` there.
    async fn convert_out_of_process(&self, path: &Path) -> Result<String> {
        let command = &self.config.converter_command;
        if command.is_empty() {
            return Err(InputError::UnsupportedArtifact(
                "no converter command configured".to_string(),
            )
            .into());
        }

        let out_dir = std::env::temp_dir().join(format!("tenderlens-convert-{}", std::process::id()));
        tokio::fs::create_dir_all(&out_dir).await?;

        let status = Command::new(&command[0])
            .args(&command[1..])
            .arg(path)
            .arg("--outdir")
            .arg(&out_dir)
            .output()
            .await
            .map_err(|e| {
                InputError::UnsupportedArtifact(format!(
                    "converter '{}' failed to start: {}",
                    command[0], e
                ))
            })?;

        if !status.status.success() {
            return Err(InputError::UnsupportedArtifact(format!(
                "converter exited with {}: {}",
                status.status,
                String::from_utf8_lossy(&status.stderr)
            ))
            .into());
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| InputError::UnsupportedArtifact(path.display().to_string()))?;
        let converted = out_dir.join(format!("{}.txt", stem));
        let text = tokio::fs::read_to_string(&converted).await.map_err(|e| {
            InputError::UnsupportedArtifact(format!(
                "converter produced no readable output for {}: {}",
                path.display(),
                e
            ))
        })?;

        let _ = tokio::fs::remove_file(&converted).await;
        Ok(text)
    }

    #[cfg(feature = "pdf")]
    async fn run_ocr(&self, path: &Path) -> Result<String> {
        let command = self
            .config
            .ocr_command
            .as_ref()
            .expect("caller checked ocr_command");
        let output = Command::new(&command[0])
            .args(&command[1..])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                InputError::UnsupportedArtifact(format!("ocr command failed to start: {}", e))
            })?;

        if !output.status.success() {
            return Err(InputError::UnsupportedArtifact(format!(
                "ocr command exited with {}",
                output.status
            ))
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Detect the document type from its content keywords
pub fn detect_doc_type(text: &str) -> DocType {
    let lower = text.to_lowercase();

    let score = |terms: &[&str]| -> usize {
        terms.iter().map(|t| lower.matches(t).count()).sum()
    };

    let pliego = score(&[
        "pliego",
        "bases de licitaci",
        "convocatoria",
        "términos de referencia",
    ]);
    let propuesta = score(&["propuesta", "oferta técnica", "oferta económica", "oferente"]);
    let contrato = score(&["contrato", "las partes", "cláusula", "contratante"]);

    let best = pliego.max(propuesta).max(contrato);
    if best == 0 {
        return DocType::Desconocido;
    }
    if best == pliego {
        DocType::Pliego
    } else if best == propuesta {
        DocType::Propuesta
    } else {
        DocType::Contrato
    }
}

/// Count captioned tables ("Tabla N" / "Cuadro N") as a cheap proxy
/// for table structure lost in text extraction
fn count_table_captions(text: &str) -> Option<usize> {
    let re = Regex::new(r"(?mi)^\s*(tabla|cuadro)\s+n?[°º]?\s*\d+").expect("static regex");
    let count = re.find_iter(text).count();
    if count > 0 {
        Some(count)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_txt_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("propuesta.txt");
        tokio::fs::write(&path, "Propuesta técnica del oferente.\r\nPlazo: 90 días.\n")
            .await
            .unwrap();

        let extractor = DocumentExtractor::new(ExtractConfig::default());
        let doc = extractor.extract(&path).await.unwrap();
        assert!(doc.text.contains("Propuesta técnica"));
        assert!(!doc.text.contains('\r'));
        assert_eq!(doc.detected_type, DocType::Propuesta);
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        tokio::fs::write(&path, "\n\n  \n").await.unwrap();

        let extractor = DocumentExtractor::new(ExtractConfig::default());
        let err = extractor.extract(&path).await.unwrap_err();
        assert_eq!(err.code(), "empty_document");
    }

    #[tokio::test]
    async fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        tokio::fs::write(&path, [0u8; 16]).await.unwrap();

        let extractor = DocumentExtractor::new(ExtractConfig::default());
        let err = extractor.extract(&path).await.unwrap_err();
        assert_eq!(err.code(), "unsupported_artifact");
    }

    #[test]
    fn test_detect_doc_type() {
        assert_eq!(
            detect_doc_type("PLIEGO DE CONDICIONES\nbases de licitación pública"),
            DocType::Pliego
        );
        assert_eq!(
            detect_doc_type("El presente contrato obliga a las partes. Cláusula primera."),
            DocType::Contrato
        );
        assert_eq!(detect_doc_type("informe sin señales"), DocType::Desconocido);
    }

    #[test]
    fn test_table_caption_count() {
        let text = "Tabla 1: precios\nintro\nCUADRO 2 cronograma\ntexto";
        assert_eq!(count_table_captions(text), Some(2));
        assert_eq!(count_table_captions("sin tablas"), None);
    }
}
