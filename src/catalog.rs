//! Taxonomy, compliance rules and risk indicator banks
//!
//! Everything in this module is data loaded once at startup and shared
//! read-only by the agents. File paths in the configuration override
//! the embedded defaults; the defaults make the system usable with no
//! data files at all.

use crate::config::CatalogConfig;
use crate::document::DocType;
use crate::error::{FatalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Number of sections in the closed taxonomy
pub const TAXONOMY_SIZE: usize = 9;

/// Section key reserved for fragments no section claims
pub const UNCLASSIFIED: &str = "unclassified";

/// The fixed 9-section tender taxonomy. Editing the table requires a
/// schema version bump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    pub schema_version: u32,
    pub sections: Vec<SectionDef>,
}

/// One taxonomy section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDef {
    pub key: String,
    pub description: String,
    /// Lower value = more important for structural completeness
    pub priority: u8,
    /// Seed keywords; also the corpus for the section centroid
    pub keywords: Vec<String>,
    /// Regexes that extract key requirements from section fragments
    #[serde(default)]
    pub requirement_patterns: Vec<String>,
    /// Canned remediation shown when the section is missing
    #[serde(default)]
    pub remediation: String,
}

impl Taxonomy {
    pub fn section(&self, key: &str) -> Option<&SectionDef> {
        self.sections.iter().find(|s| s.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.key.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.sections.len() != TAXONOMY_SIZE {
            return Err(FatalError::ConfigInvalid(format!(
                "taxonomy must have exactly {} sections, found {}",
                TAXONOMY_SIZE,
                self.sections.len()
            ))
            .into());
        }
        for section in &self.sections {
            if section.keywords.is_empty() {
                return Err(FatalError::ConfigInvalid(format!(
                    "taxonomy section '{}' has no keywords",
                    section.key
                ))
                .into());
            }
            if section.key == UNCLASSIFIED {
                return Err(FatalError::ConfigInvalid(
                    "'unclassified' is a reserved section key".to_string(),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Compliance rule sets keyed by document type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSets {
    pub by_type: BTreeMap<String, RuleSet>,
}

impl RuleSets {
    /// Rules for a document type, falling back to the generic set
    pub fn for_type(&self, doc_type: DocType) -> &RuleSet {
        self.by_type
            .get(doc_type.as_str())
            .or_else(|| self.by_type.get(DocType::Desconocido.as_str()))
            .expect("rule sets always carry a fallback entry")
    }

    fn validate(&self) -> Result<()> {
        if !self.by_type.contains_key(DocType::Desconocido.as_str()) {
            return Err(FatalError::ConfigInvalid(
                "rule sets must include a 'desconocido' fallback".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Rules and structural requirements for one document type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    /// Sections that must be present for structural completeness
    pub required_sections: Vec<String>,
    pub rules: Vec<ComplianceRule>,
}

/// A single compliance rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub id: String,
    pub category: String,
    pub description: String,
    pub predicate: RulePredicate,
    /// Canned remediation shown when the rule fails
    pub remediation: String,
}

/// Rule predicate variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePredicate {
    /// The document text matches the regex
    Regex { pattern: String },
    /// At least `min_hits` of the terms appear in the text
    Keywords { any: Vec<String>, min_hits: usize },
    /// The classification found the section
    SectionPresent { section: String },
}

/// Risk indicator banks for the five fixed categories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorBanks {
    pub categories: Vec<RiskCategoryDef>,
    /// Terms that mark a top risk fragment as critical
    pub legal_monetary_terms: Vec<String>,
}

/// One risk category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCategoryDef {
    pub key: String,
    /// Weight in the total score, in (0, 1]
    pub weight: f32,
    /// Indicator term -> severity in [1, 3]
    pub indicators: BTreeMap<String, u8>,
    /// Seed phrases for the category centroid
    pub seed_terms: Vec<String>,
    pub mitigations: Vec<MitigationTemplate>,
}

/// A mitigation template, optionally tied to one indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationTemplate {
    /// When set, fires only if this indicator was detected
    #[serde(default)]
    pub indicator: Option<String>,
    pub text: String,
}

impl IndicatorBanks {
    pub fn category(&self, key: &str) -> Option<&RiskCategoryDef> {
        self.categories.iter().find(|c| c.key == key)
    }

    fn validate(&self) -> Result<()> {
        if self.categories.len() != 5 {
            return Err(FatalError::ConfigInvalid(format!(
                "risk banks must define exactly 5 categories, found {}",
                self.categories.len()
            ))
            .into());
        }
        for category in &self.categories {
            if !(0.0..=1.0).contains(&category.weight) || category.weight == 0.0 {
                return Err(FatalError::ConfigInvalid(format!(
                    "risk category '{}' weight must be in (0, 1]",
                    category.key
                ))
                .into());
            }
            for (term, severity) in &category.indicators {
                if !(1..=3).contains(severity) {
                    return Err(FatalError::ConfigInvalid(format!(
                        "indicator '{}' severity must be in [1, 3]",
                        term
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Finding severity used by the synthesis table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A key-finding template keyed on (stage, severity, category)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRule {
    pub stage: String,
    pub severity: Severity,
    pub category: String,
    /// `{detail}` is replaced with the agent-provided detail
    pub template: String,
}

/// Everything the agents read: loaded once, shared read-only
#[derive(Debug, Clone)]
pub struct Catalog {
    pub taxonomy: Taxonomy,
    pub rules: RuleSets,
    pub indicators: IndicatorBanks,
    pub findings: Vec<FindingRule>,
}

impl Catalog {
    /// Load the catalog, preferring configured file paths over the
    /// embedded defaults
    pub fn load(config: &CatalogConfig) -> Result<Self> {
        let taxonomy = match &config.taxonomy_path {
            Some(path) => load_toml(path)?,
            None => default_taxonomy(),
        };
        let rules = match &config.rules_path {
            Some(path) => load_toml(path)?,
            None => default_rules(),
        };
        let indicators = match &config.indicators_path {
            Some(path) => load_toml(path)?,
            None => default_indicators(),
        };

        taxonomy.validate()?;
        rules.validate()?;
        indicators.validate()?;

        Ok(Self {
            taxonomy,
            rules,
            indicators,
            findings: default_finding_rules(),
        })
    }

    /// Find the template for a (stage, severity, category) key
    pub fn finding_template(
        &self,
        stage: &str,
        severity: Severity,
        category: &str,
    ) -> Option<&FindingRule> {
        self.findings
            .iter()
            .find(|f| f.stage == stage && f.severity == severity && f.category == category)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FatalError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| FatalError::ConfigInvalid(format!("cannot parse {}: {}", path.display(), e)).into())
}

fn section(
    key: &str,
    description: &str,
    priority: u8,
    keywords: &[&str],
    patterns: &[&str],
    remediation: &str,
) -> SectionDef {
    SectionDef {
        key: key.to_string(),
        description: description.to_string(),
        priority,
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        requirement_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        remediation: remediation.to_string(),
    }
}

/// Embedded default taxonomy
pub fn default_taxonomy() -> Taxonomy {
    Taxonomy {
        schema_version: 2,
        sections: vec![
            section(
                "datos_generales",
                "Identification of the process, contracting entity and reference budget",
                1,
                &[
                    "entidad contratante",
                    "convocante",
                    "código del proceso",
                    "licitación",
                    "presupuesto referencial",
                    "ubicación",
                    "objeto de contratación",
                ],
                &[
                    r"(?i)c[oó]digo\s+(?:del\s+)?proceso[:\s]+[\w-]+",
                    r"(?i)presupuesto\s+referencial[^.\n]{0,80}",
                ],
                "Add a general data section identifying the entity, process code and reference budget",
            ),
            section(
                "alcance_objeto",
                "Scope and object of the works",
                1,
                &[
                    "alcance",
                    "objeto del contrato",
                    "obra civil",
                    "construcción",
                    "trabajos a ejecutar",
                    "actividades",
                    "entregables",
                ],
                &[r"(?i)el\s+contratista\s+deber[aá][^.\n]{10,200}"],
                "Describe the scope and object of the works explicitly",
            ),
            section(
                "especificaciones_tecnicas",
                "Technical specifications, materials and standards",
                2,
                &[
                    "especificaciones técnicas",
                    "materiales",
                    "normas",
                    "calidad",
                    "hormigón",
                    "acero",
                    "ensayos",
                    "planos",
                ],
                &[
                    r"(?i)norma\s+(?:inen|astm|aci|iso|nec)[\s\w.-]{0,30}",
                    r"(?i)resistencia\s+[^.\n]{5,120}",
                ],
                "Add technical specifications referencing applicable standards",
            ),
            section(
                "condiciones_economicas",
                "Price, payment terms and budget",
                1,
                &[
                    "precio",
                    "forma de pago",
                    "anticipo",
                    "presupuesto",
                    "valor",
                    "planilla",
                    "reajuste",
                ],
                &[
                    r"(?i)anticipo\s+del?\s+\d{1,3}\s*%",
                    r"(?i)(?:usd|\$)\s*[\d.,]+",
                ],
                "State the economic conditions: price, advance and payment schedule",
            ),
            section(
                "requisitos_legales",
                "Legal and administrative requirements",
                2,
                &[
                    "ruc",
                    "registro único",
                    "habilitado",
                    "certificado",
                    "cumplimiento",
                    "sercop",
                    "afiliación",
                ],
                &[
                    r"(?i)ruc[\s:]*[\d.\- ]{10,20}",
                    r"(?i)certificado\s+de\s+[^.\n]{5,80}",
                ],
                "List the legal requirements, including the contractor RUC",
            ),
            section(
                "plazos_cronograma",
                "Deadlines, schedule and milestones",
                1,
                &[
                    "plazo",
                    "cronograma",
                    "días calendario",
                    "entrega",
                    "hitos",
                    "fecha de inicio",
                    "terminación",
                ],
                &[
                    r"(?i)plazo\s+de\s+ejecuci[oó]n[^.\n]{3,80}",
                    r"(?i)\d+\s+d[ií]as\s+(?:calendario|laborables|h[aá]biles)",
                ],
                "Provide an execution schedule with concrete dates and deadlines",
            ),
            section(
                "garantias",
                "Bonds and guarantees",
                2,
                &[
                    "garantía",
                    "fiel cumplimiento",
                    "buen uso del anticipo",
                    "póliza",
                    "vigencia",
                    "aseguradora",
                ],
                &[
                    r"(?i)garant[ií]a\s+de\s+[^.\n]{5,100}",
                    r"(?i)p[oó]liza\s+[^.\n]{5,100}",
                ],
                "Specify the required guarantees and their coverage",
            ),
            section(
                "experiencia_equipo",
                "Required experience, personnel and equipment",
                3,
                &[
                    "experiencia",
                    "personal técnico",
                    "residente de obra",
                    "proyectos similares",
                    "equipo mínimo",
                    "maquinaria",
                ],
                &[r"(?i)experiencia\s+(?:general|espec[ií]fica)[^.\n]{5,150}"],
                "Describe the experience and key personnel requirements",
            ),
            section(
                "condiciones_contractuales",
                "Contractual conditions: penalties, termination, disputes",
                3,
                &[
                    "multa",
                    "terminación",
                    "controversias",
                    "cláusula",
                    "obligaciones",
                    "administrador del contrato",
                    "recepción",
                ],
                &[
                    r"(?i)multa\s+[^.\n]{5,150}",
                    r"(?i)terminaci[oó]n\s+(?:anticipada|unilateral)[^.\n]{0,120}",
                ],
                "Add the contractual conditions covering penalties and termination",
            ),
        ],
    }
}

fn rule(
    id: &str,
    category: &str,
    description: &str,
    predicate: RulePredicate,
    remediation: &str,
) -> ComplianceRule {
    ComplianceRule {
        id: id.to_string(),
        category: category.to_string(),
        description: description.to_string(),
        predicate,
        remediation: remediation.to_string(),
    }
}

fn keywords(any: &[&str], min_hits: usize) -> RulePredicate {
    RulePredicate::Keywords {
        any: any.iter().map(|s| s.to_string()).collect(),
        min_hits,
    }
}

/// Embedded default compliance rule sets
pub fn default_rules() -> RuleSets {
    let mut by_type = BTreeMap::new();

    by_type.insert(
        DocType::Pliego.as_str().to_string(),
        RuleSet {
            required_sections: vec![
                "datos_generales".to_string(),
                "alcance_objeto".to_string(),
                "especificaciones_tecnicas".to_string(),
                "condiciones_economicas".to_string(),
                "plazos_cronograma".to_string(),
                "garantias".to_string(),
            ],
            rules: vec![
                rule(
                    "pli-presupuesto",
                    "economico",
                    "States a reference budget",
                    RulePredicate::Regex {
                        pattern: r"(?i)presupuesto\s+referencial".to_string(),
                    },
                    "State the reference budget of the process",
                ),
                rule(
                    "pli-cronograma",
                    "tecnico",
                    "Includes a process schedule",
                    keywords(&["cronograma", "calendario del proceso"], 1),
                    "Include the process schedule with dates per milestone",
                ),
                rule(
                    "pli-evaluacion",
                    "tecnico",
                    "Defines evaluation criteria",
                    keywords(&["criterios de evaluación", "calificación", "puntaje"], 1),
                    "Define the offer evaluation criteria and weights",
                ),
                rule(
                    "pli-garantias",
                    "legal",
                    "Requires guarantees",
                    RulePredicate::SectionPresent {
                        section: "garantias".to_string(),
                    },
                    "Specify the guarantees the contractor must post",
                ),
                rule(
                    "pli-anticipo",
                    "economico",
                    "Regulates the advance payment",
                    RulePredicate::Regex {
                        pattern: r"(?i)anticipo".to_string(),
                    },
                    "Regulate whether an advance is granted and its percentage",
                ),
            ],
        },
    );

    by_type.insert(
        DocType::Propuesta.as_str().to_string(),
        RuleSet {
            required_sections: vec![
                "datos_generales".to_string(),
                "alcance_objeto".to_string(),
                "condiciones_economicas".to_string(),
                "plazos_cronograma".to_string(),
                "experiencia_equipo".to_string(),
            ],
            rules: vec![
                rule(
                    "pro-ruc",
                    "legal",
                    "Offers carry the bidder RUC",
                    RulePredicate::Regex {
                        pattern: r"(?i)ruc[\s:]*[\d.\- ]{10,20}".to_string(),
                    },
                    "Include the bidder's RUC in the identification section",
                ),
                rule(
                    "pro-precio",
                    "economico",
                    "States the offered price",
                    keywords(&["valor de la oferta", "precio total", "monto ofertado"], 1),
                    "State the total offered price in figures and words",
                ),
                rule(
                    "pro-plazo",
                    "tecnico",
                    "Commits to an execution deadline",
                    RulePredicate::Regex {
                        pattern: r"(?i)plazo\s+de\s+(?:ejecuci[oó]n|entrega)".to_string(),
                    },
                    "Commit to an explicit execution deadline",
                ),
                rule(
                    "pro-validez",
                    "economico",
                    "States offer validity",
                    keywords(&["validez de la oferta", "vigencia de la oferta"], 1),
                    "State how long the offer remains valid",
                ),
                rule(
                    "pro-experiencia",
                    "tecnico",
                    "Documents similar-project experience",
                    RulePredicate::SectionPresent {
                        section: "experiencia_equipo".to_string(),
                    },
                    "Document experience in similar projects",
                ),
                rule(
                    "pro-firma",
                    "legal",
                    "Signed by the legal representative",
                    keywords(&["representante legal", "firma"], 1),
                    "Have the legal representative sign the offer",
                ),
            ],
        },
    );

    by_type.insert(
        DocType::Contrato.as_str().to_string(),
        RuleSet {
            required_sections: vec![
                "datos_generales".to_string(),
                "alcance_objeto".to_string(),
                "condiciones_economicas".to_string(),
                "plazos_cronograma".to_string(),
                "garantias".to_string(),
                "condiciones_contractuales".to_string(),
            ],
            rules: vec![
                rule(
                    "con-partes",
                    "legal",
                    "Identifies the contracting parties",
                    keywords(&["contratante", "contratista", "las partes"], 2),
                    "Identify both contracting parties with their RUC",
                ),
                rule(
                    "con-precio",
                    "economico",
                    "States the contract price",
                    RulePredicate::Regex {
                        pattern: r"(?i)(?:usd|\$)\s*[\d.,]+".to_string(),
                    },
                    "State the contract price",
                ),
                rule(
                    "con-multas",
                    "legal",
                    "Defines penalties for delay",
                    RulePredicate::Regex {
                        pattern: r"(?i)multa".to_string(),
                    },
                    "Define penalties for late delivery",
                ),
                rule(
                    "con-garantias",
                    "legal",
                    "Lists the posted guarantees",
                    RulePredicate::SectionPresent {
                        section: "garantias".to_string(),
                    },
                    "List the guarantees posted by the contractor",
                ),
                rule(
                    "con-administrador",
                    "tecnico",
                    "Designates a contract administrator",
                    keywords(&["administrador del contrato", "fiscalizador"], 1),
                    "Designate the contract administrator",
                ),
            ],
        },
    );

    // Fallback for unknown document types: structural minimum only
    by_type.insert(
        DocType::Desconocido.as_str().to_string(),
        RuleSet {
            required_sections: vec![
                "datos_generales".to_string(),
                "alcance_objeto".to_string(),
                "plazos_cronograma".to_string(),
            ],
            rules: vec![
                rule(
                    "gen-plazo",
                    "tecnico",
                    "Mentions execution deadlines",
                    keywords(&["plazo", "cronograma", "entrega"], 1),
                    "State the execution deadlines",
                ),
                rule(
                    "gen-valor",
                    "economico",
                    "Mentions monetary values",
                    RulePredicate::Regex {
                        pattern: r"(?i)(?:usd|\$)\s*[\d.,]+".to_string(),
                    },
                    "State the monetary values involved",
                ),
            ],
        },
    );

    RuleSets { by_type }
}

fn risk_category(
    key: &str,
    weight: f32,
    indicators: &[(&str, u8)],
    seed_terms: &[&str],
    mitigations: &[(&str, &str)],
) -> RiskCategoryDef {
    RiskCategoryDef {
        key: key.to_string(),
        weight,
        indicators: indicators
            .iter()
            .map(|(term, sev)| (term.to_string(), *sev))
            .collect(),
        seed_terms: seed_terms.iter().map(|s| s.to_string()).collect(),
        mitigations: mitigations
            .iter()
            .map(|(indicator, text)| MitigationTemplate {
                indicator: if indicator.is_empty() {
                    None
                } else {
                    Some(indicator.to_string())
                },
                text: text.to_string(),
            })
            .collect(),
    }
}

/// Embedded default risk indicator banks
pub fn default_indicators() -> IndicatorBanks {
    IndicatorBanks {
        categories: vec![
            risk_category(
                "technical",
                0.25,
                &[
                    ("sin especificar", 2),
                    ("a definir", 2),
                    ("sujeto a cambios", 3),
                    ("provisional", 1),
                    ("aproximado", 1),
                    ("indeterminado", 2),
                    ("podrá modificarse", 3),
                ],
                &[
                    "especificaciones incompletas o ambiguas",
                    "cambios de diseño durante la obra",
                ],
                &[
                    ("sujeto a cambios", "Freeze the technical baseline before award and route changes through a formal change-order process"),
                    ("", "Request clarification rounds to close technical ambiguities before bidding"),
                ],
            ),
            risk_category(
                "economic",
                0.25,
                &[
                    ("sobrecosto", 3),
                    ("fluctuación", 2),
                    ("variación de precios", 2),
                    ("intereses de mora", 2),
                    ("retención", 1),
                    ("sin reajuste", 2),
                    ("inflación", 1),
                ],
                &[
                    "riesgo de sobrecostos y variación de precios",
                    "condiciones de pago desfavorables",
                ],
                &[
                    ("sobrecosto", "Cap cost overruns contractually and require itemized budgets per work front"),
                    ("sin reajuste", "Negotiate a price adjustment formula indexed to official construction indices"),
                    ("", "Model cash flow against the payment schedule before committing"),
                ],
            ),
            risk_category(
                "legal",
                0.20,
                &[
                    ("litigio", 3),
                    ("demanda", 3),
                    ("controversia", 2),
                    ("incumplimiento", 2),
                    ("rescisión", 2),
                    ("terminación unilateral", 3),
                    ("sanción", 2),
                    ("inhabilitado", 3),
                ],
                &[
                    "antecedentes de litigios y controversias contractuales",
                    "causales de terminación unilateral",
                ],
                &[
                    ("terminación unilateral", "Review unilateral termination clauses with counsel and negotiate cure periods"),
                    ("", "Verify the counterparty's standing in the public procurement registry"),
                ],
            ),
            risk_category(
                "operational",
                0.15,
                &[
                    ("retraso", 2),
                    ("suspensión", 3),
                    ("paralización", 3),
                    ("fuerza mayor", 1),
                    ("clima adverso", 1),
                    ("interferencia", 2),
                    ("acceso restringido", 2),
                    ("escasez", 2),
                ],
                &[
                    "riesgo de retrasos y paralizaciones de obra",
                    "restricciones de acceso al sitio",
                ],
                &[
                    ("retraso", "Build schedule float into critical-path activities and track weekly progress"),
                    ("", "Prepare a site logistics plan covering access and utility interferences"),
                ],
            ),
            risk_category(
                "supplier",
                0.15,
                &[
                    ("proveedor único", 3),
                    ("desabastecimiento", 3),
                    ("subcontratación", 2),
                    ("importación", 2),
                    ("dependencia", 2),
                    ("monopolio", 3),
                ],
                &[
                    "dependencia de proveedores únicos o importaciones",
                    "cadena de suministro frágil",
                ],
                &[
                    ("proveedor único", "Qualify at least one alternate supplier for single-sourced materials"),
                    ("importación", "Order long-lead imported items early and track them as schedule risks"),
                    ("", "Map the supply chain for critical materials before mobilization"),
                ],
            ),
        ],
        legal_monetary_terms: vec![
            "multa".to_string(),
            "penalidad".to_string(),
            "sanción".to_string(),
            "indemnización".to_string(),
            "garantía".to_string(),
            "usd".to_string(),
            "$".to_string(),
        ],
    }
}

/// Embedded key-finding synthesis table
pub fn default_finding_rules() -> Vec<FindingRule> {
    let rule = |stage: &str, severity: Severity, category: &str, template: &str| FindingRule {
        stage: stage.to_string(),
        severity,
        category: category.to_string(),
        template: template.to_string(),
    };

    vec![
        rule(
            "classifying",
            Severity::Warning,
            "coverage",
            "Section coverage is thin: {detail}",
        ),
        rule(
            "validating",
            Severity::Critical,
            "structural",
            "Document rejected by validation: {detail}",
        ),
        rule(
            "validating",
            Severity::Warning,
            "compliance",
            "Compliance gaps detected: {detail}",
        ),
        rule(
            "validating",
            Severity::Warning,
            "dates",
            "Date coverage is inadequate: {detail}",
        ),
        rule(
            "risk",
            Severity::Critical,
            "overall",
            "High aggregate risk: {detail}",
        ),
        rule(
            "risk",
            Severity::Warning,
            "category",
            "Elevated risk in {detail}",
        ),
        rule(
            "ruc",
            Severity::Warning,
            "registry",
            "Contractor identification issues: {detail}",
        ),
        rule(
            "ruc",
            Severity::Info,
            "registry",
            "Contractor identification verified: {detail}",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = Catalog::load(&CatalogConfig::default()).unwrap();
        assert_eq!(catalog.taxonomy.sections.len(), TAXONOMY_SIZE);
        assert_eq!(catalog.indicators.categories.len(), 5);
        assert!(catalog.rules.by_type.contains_key("desconocido"));
    }

    #[test]
    fn test_risk_weights_are_normalizable() {
        let banks = default_indicators();
        let total: f32 = banks.categories.iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rule_set_fallback() {
        let rules = default_rules();
        let fallback = rules.for_type(DocType::Desconocido);
        assert!(!fallback.required_sections.is_empty());
        assert!(std::ptr::eq(
            rules.for_type(DocType::Desconocido),
            rules.by_type.get("desconocido").unwrap()
        ));
    }

    #[test]
    fn test_taxonomy_requirement_patterns_compile() {
        for section in default_taxonomy().sections {
            for pattern in &section.requirement_patterns {
                assert!(
                    regex::Regex::new(pattern).is_ok(),
                    "pattern failed to compile: {}",
                    pattern
                );
            }
        }
    }

    #[test]
    fn test_taxonomy_file_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.toml");
        let mut taxonomy = default_taxonomy();
        taxonomy.sections[0].keywords.push("minera".to_string());
        std::fs::write(&path, toml::to_string(&taxonomy).unwrap()).unwrap();

        let config = CatalogConfig {
            taxonomy_path: Some(path),
            ..Default::default()
        };
        let catalog = Catalog::load(&config).unwrap();
        assert!(catalog.taxonomy.sections[0]
            .keywords
            .contains(&"minera".to_string()));
    }

    #[test]
    fn test_invalid_taxonomy_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.toml");
        let mut taxonomy = default_taxonomy();
        taxonomy.sections.pop();
        std::fs::write(&path, toml::to_string(&taxonomy).unwrap()).unwrap();

        let config = CatalogConfig {
            taxonomy_path: Some(path),
            ..Default::default()
        };
        let err = Catalog::load(&config).unwrap_err();
        assert_eq!(err.code(), "config_invalid");
    }

    #[test]
    fn test_finding_template_lookup() {
        let catalog = Catalog::load(&CatalogConfig::default()).unwrap();
        let template = catalog
            .finding_template("risk", Severity::Critical, "overall")
            .unwrap();
        assert!(template.template.contains("{detail}"));
        assert!(catalog
            .finding_template("risk", Severity::Info, "nonexistent")
            .is_none());
    }
}
