//! Test helpers and utilities for the TenderLens test suite

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tenderlens::catalog::Catalog;
use tenderlens::config::{AnalysisConfig, CatalogConfig, RetryConfig};
use tenderlens::embedding::{l2_normalize, EmbeddingRouter};
use tenderlens::store::SqliteVectorStore;
use tenderlens::{AnalysisContext, EmbeddingBackend, Result};

pub const TEST_DIMENSION: usize = 256;

/// Deterministic bag-of-tokens embedder: each token hashes to a fixed
/// pseudo-vector and a text embeds to the normalized sum, so texts
/// sharing vocabulary land close together
pub struct TestEmbedder {
    name: &'static str,
    dimension: usize,
}

impl TestEmbedder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            dimension: TEST_DIMENSION,
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.len() < 3 {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            for (i, slot) in out.iter_mut().enumerate() {
                let byte = digest[i % digest.len()];
                let mixed = byte.wrapping_mul((i as u8).wrapping_add(31));
                *slot += (mixed as f32 / 127.5) - 1.0;
            }
        }
        l2_normalize(&mut out);
        out
    }
}

#[async_trait]
impl EmbeddingBackend for TestEmbedder {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "bag-of-tokens"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// A provider that always refuses, for fallback tests
pub struct DownBackend {
    name: &'static str,
}

impl DownBackend {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl EmbeddingBackend for DownBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "unreachable"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(tenderlens::error::DependencyError::EmbeddingUnavailable(
            "connection refused".to_string(),
        )
        .into())
    }
}

/// Build a test configuration rooted in a temp directory
pub fn test_config(data_root: &Path) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.data_root = data_root.to_path_buf();
    config.embedding.dimension = TEST_DIMENSION;
    config.retry = RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
    };
    config
}

/// Build an analysis context from an explicit configuration
pub async fn context_from_config(
    config: AnalysisConfig,
    backends: Vec<Arc<dyn EmbeddingBackend>>,
) -> Arc<AnalysisContext> {
    let catalog = Catalog::load(&CatalogConfig::default()).unwrap();
    let retry = config.retry.clone();
    let embedder = EmbeddingRouter::from_backends(backends, retry);
    let store = SqliteVectorStore::open(&config.store_path()).await.unwrap();

    Arc::new(AnalysisContext::from_parts(
        Arc::new(config),
        Arc::new(catalog),
        Arc::new(embedder),
        Arc::new(store),
        None,
    ))
}

/// Build an analysis context over the given backends
pub async fn test_context_with(
    data_root: &Path,
    backends: Vec<Arc<dyn EmbeddingBackend>>,
) -> Arc<AnalysisContext> {
    context_from_config(test_config(data_root), backends).await
}

/// Context with a single healthy deterministic embedder
pub async fn test_context(data_root: &Path) -> Arc<AnalysisContext> {
    test_context_with(data_root, vec![Arc::new(TestEmbedder::new("local"))]).await
}

/// Write a text file into the temp dir and return its path
pub async fn write_doc(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, text).await.unwrap();
    path
}

fn pad(base: &str, filler: &str, target_chars: usize) -> String {
    let mut out = base.to_string();
    while out.chars().count() < target_chars {
        out.push(' ');
        out.push_str(filler);
    }
    out
}

/// A complete ~12,000-character proposal touching all nine taxonomy
/// sections, with concrete dates, a deadline and a checksum-valid RUC
pub fn full_proposal_text() -> String {
    let sections = [
        pad(
            "PROPUESTA TÉCNICA Y ECONÓMICA. Entidad contratante: Gobierno Municipal. \
             Código del proceso: LICO-2026-017. Licitación pública para obra civil. \
             Presupuesto referencial de la convocatoria: USD 1.500.000,00. \
             Objeto de contratación: rehabilitación vial urbana. Ubicación: distrito norte. \
             El oferente se identifica con RUC: 1790016919001 y declara su voluntad de participar.",
            "Los datos generales del proceso y el presupuesto referencial se publican con la licitación.",
            1100,
        ),
        pad(
            "ALCANCE Y OBJETO DEL CONTRATO. El alcance comprende los trabajos a ejecutar \
             de la obra civil: movimiento de tierras, estructura y acabados. \
             El contratista deberá ejecutar todas las actividades y entregables descritos, \
             incluida la construcción de obras de drenaje menor.",
            "El alcance incluye actividades de construcción, trabajos a ejecutar y entregables parciales.",
            1100,
        ),
        pad(
            "ESPECIFICACIONES TÉCNICAS. Los materiales cumplirán las especificaciones técnicas \
             y normas aplicables: norma INEN 1855 y norma ASTM C39 para ensayos de hormigón. \
             Resistencia mínima del hormigón: 280 kg/cm2 según planos estructurales. \
             El acero de refuerzo cumplirá los ensayos de calidad exigidos.",
            "Las especificaciones técnicas de materiales, hormigón y acero se verifican con ensayos y planos.",
            1100,
        ),
        pad(
            "CONDICIONES ECONÓMICAS. Valor de la oferta: USD 1.447.800,00. La oferta económica se mantiene firme. \
             Forma de pago: planilla mensual contra avance. Anticipo del 30 % del valor. \
             Validez de la oferta: 90 días. El presupuesto se desglosa por rubros sin reajuste \
             durante los primeros doce meses.",
            "El precio, el anticipo y la forma de pago por planilla sustentan la oferta del oferente.",
            1100,
        ),
        pad(
            "REQUISITOS LEGALES. El oferente se encuentra habilitado en el registro único de \
             proveedores y adjunta el certificado de cumplimiento tributario vigente. \
             Certificado de no adeudar al municipio. Afiliación patronal al día. \
             Registro en SERCOP vigente. RUC: 1790016919001.",
            "El certificado de cumplimiento y la habilitación del registro único constan en los requisitos legales.",
            1100,
        ),
        pad(
            "PLAZOS Y CRONOGRAMA. Plazo de ejecución: 180 días calendario. \
             Fecha de inicio prevista: 15/03/2026. Hito intermedio de estructura: 15/06/2026. \
             La entrega definitiva vence a más tardar el 11/09/2026 como fecha límite. \
             El cronograma de hitos acompaña la propuesta con fecha de inicio y terminación.",
            "El cronograma establece el plazo en días calendario con hitos de entrega y terminación.",
            1100,
        ),
        pad(
            "GARANTÍAS. Se rendirá garantía de fiel cumplimiento del contrato por el 5 % \
             y garantía de buen uso del anticipo por el 100 % del anticipo, mediante póliza \
             emitida por aseguradora autorizada, con vigencia hasta la recepción definitiva.",
            "La garantía de fiel cumplimiento y la póliza de la aseguradora permanecen en vigencia.",
            1100,
        ),
        pad(
            "EXPERIENCIA Y EQUIPO. Experiencia general de quince años y experiencia específica \
             en tres proyectos similares de vialidad urbana. Personal técnico clave: \
             residente de obra a tiempo completo. Equipo mínimo: maquinaria de excavación \
             y compactación propia. Se adjunta el curriculum del personal técnico.",
            "La experiencia específica en proyectos similares y el personal técnico cumplen el equipo mínimo.",
            1100,
        ),
        pad(
            "CONDICIONES CONTRACTUALES. El oferente acepta las obligaciones del pliego, \
             la cláusula de multa por retardo del uno por mil diario y el procedimiento de \
             recepción provisional y definitiva. El administrador del contrato supervisará \
             las obligaciones. Las controversias se resolverán por mediación. \
             Firma del representante legal.",
            "Las obligaciones de recepción provisional y definitiva se detallan para la administración de la obra.",
            1100,
        ),
    ];

    sections.join("\n\n")
}

/// A ~2,000-character scope note with no dates and no required detail
pub fn short_fragment_text() -> String {
    pad(
        "NOTA DE ALCANCE PRELIMINAR. Se describe de manera general el alcance de los \
         trabajos de obra civil previstos para la intervención, sin montos ni calendario.",
        "La nota resume el alcance general de los trabajos de la obra sin mayor detalle.",
        2000,
    )
}
