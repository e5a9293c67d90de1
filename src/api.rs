//! REST API server for the analysis platform
//!
//! Provides HTTP endpoints for:
//! - Document upload and analysis polling
//! - Multi-document comparison
//! - Report generation (JSON/HTML)
//! - System health

use crate::artifacts::comparison_id;
use crate::document::{AnalysisLevel, DocId, DocType, Document, RunId};
use crate::error::AnalysisError;
use crate::orchestrator::Orchestrator;
use crate::report::ReportAssembler;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    uploads_dir: std::path::PathBuf,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, data_root: &std::path::Path) -> std::io::Result<Self> {
        let uploads_dir = data_root.join("uploads");
        std::fs::create_dir_all(&uploads_dir)?;
        Ok(Self {
            orchestrator,
            uploads_dir,
        })
    }
}

/// Response for an accepted upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub run_id: String,
    pub doc_id: String,
    #[schema(example = "processing")]
    pub status: String,
}

/// Response for an accepted comparison upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComparisonUploadResponse {
    pub comparison_id: String,
    pub doc_ids: Vec<String>,
    #[schema(example = "processing")]
    pub status: String,
}

/// Report request body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportRequest {
    /// "analysis" or "comparison"; inferred from the id when omitted
    #[serde(default)]
    pub report_type: Option<String>,
    /// json, html or pdf
    #[schema(example = "json")]
    pub format: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "0.3.0")]
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Build the router with all endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analysis/upload", post(upload_analysis))
        .route("/analysis/{doc_id}", get(get_analysis))
        .route("/comparison/upload-multiple", post(upload_comparison))
        .route("/comparison/{comparison_id}", get(get_comparison))
        .route("/reports/{id}", post(generate_report))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the process is stopped
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Fields accepted alongside the binary in a multipart upload
#[derive(Default)]
struct UploadFields {
    doc_type: Option<String>,
    analysis_level: Option<String>,
    force_rebuild: bool,
}

async fn read_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<(Vec<std::path::PathBuf>, UploadFields), Response> {
    let mut files = Vec::new();
    let mut fields = UploadFields::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        bad_request(format!("malformed multipart body: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" => {
                let original = field
                    .file_name()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "upload.bin".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
                let path = state
                    .uploads_dir
                    .join(format!("{}-{}", Uuid::new_v4(), sanitize(&original)));
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    return Err(internal(format!("failed to persist upload: {}", e)));
                }
                files.push(path);
            }
            "docType" | "doc_type" => {
                fields.doc_type = field.text().await.ok();
            }
            "analysisLevel" | "analysis_level" => {
                fields.analysis_level = field.text().await.ok();
            }
            "forceRebuild" | "force_rebuild" => {
                fields.force_rebuild = field
                    .text()
                    .await
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false);
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(bad_request("no file field in upload".to_string()));
    }
    Ok((files, fields))
}

async fn upload_analysis(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let (files, fields) = match read_upload(&state, &mut multipart).await {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    let declared = fields
        .doc_type
        .as_deref()
        .map(DocType::parse)
        .unwrap_or(DocType::Desconocido);
    let level = fields
        .analysis_level
        .as_deref()
        .map(AnalysisLevel::parse)
        .unwrap_or(AnalysisLevel::Basic);

    let document = match state.orchestrator.ingest(&files[0], declared).await {
        Ok(document) => document,
        Err(e) => return error_to_response(e),
    };

    let doc_id = document.doc_id.clone();
    let run_id = state
        .orchestrator
        .start(document, level, fields.force_rebuild);

    (
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            run_id: run_id.to_string(),
            doc_id: doc_id.to_string(),
            status: "processing".to_string(),
        }),
    )
        .into_response()
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Response {
    let doc_id = DocId::from_raw(doc_id);

    // A finished artifact wins; otherwise report live progress
    match state
        .orchestrator
        .artifacts()
        .latest_artifact_for_doc(&doc_id)
        .await
    {
        Ok(Some(artifact)) => Json(artifact).into_response(),
        Ok(None) => {
            for level in [AnalysisLevel::Comprehensive, AnalysisLevel::Basic] {
                let run_id = RunId::new(&doc_id, level);
                if let Ok(status) = state.orchestrator.status(&run_id).await {
                    return Json(json!({
                        "status": "processing",
                        "stage": status.stage,
                        "progress": status.progress,
                        "run_id": status.run_id,
                    }))
                    .into_response();
                }
            }
            not_found(format!("no analysis for document {}", doc_id.short()))
        }
        Err(e) => error_to_response(e),
    }
}

async fn upload_comparison(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let (files, fields) = match read_upload(&state, &mut multipart).await {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    if files.len() < 2 {
        return bad_request("a comparison needs at least two files".to_string());
    }

    let declared = fields
        .doc_type
        .as_deref()
        .map(DocType::parse)
        .unwrap_or(DocType::Desconocido);
    let level = fields
        .analysis_level
        .as_deref()
        .map(AnalysisLevel::parse)
        .unwrap_or(AnalysisLevel::Basic);

    let mut documents: Vec<Document> = Vec::with_capacity(files.len());
    for path in &files {
        match state.orchestrator.ingest(path, declared).await {
            Ok(document) => documents.push(document),
            Err(e) => return error_to_response(e),
        }
    }

    let doc_ids: Vec<DocId> = documents.iter().map(|d| d.doc_id.clone()).collect();
    let id = comparison_id(&doc_ids);

    let orchestrator = Arc::clone(&state.orchestrator);
    let force = fields.force_rebuild;
    let spawned_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .compare_documents(documents, level, force)
            .await
        {
            error!("Comparison {} failed: {}", spawned_id, e);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(ComparisonUploadResponse {
            comparison_id: id,
            doc_ids: doc_ids.iter().map(|d| d.to_string()).collect(),
            status: "processing".to_string(),
        }),
    )
        .into_response()
}

async fn get_comparison(
    State(state): State<AppState>,
    Path(comparison_id): Path<String>,
) -> Response {
    match state
        .orchestrator
        .artifacts()
        .load_comparison(&comparison_id)
        .await
    {
        Ok(Some(comparison)) => Json(comparison).into_response(),
        Ok(None) => Json(json!({ "status": "processing" })).into_response(),
        Err(e) => error_to_response(e),
    }
}

async fn generate_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReportRequest>,
) -> Response {
    let assembler = ReportAssembler;

    // The id is either a run id or a comparison id
    let bundle = match state
        .orchestrator
        .artifacts()
        .load_artifact(&RunId::from_raw(id.clone()))
        .await
    {
        Ok(Some(artifact)) => assembler.from_artifact(&artifact),
        Ok(None) => match state.orchestrator.artifacts().load_comparison(&id).await {
            Ok(Some(comparison)) => assembler.from_comparison(&comparison),
            Ok(None) => return not_found(format!("no artifact or comparison with id {}", id)),
            Err(e) => return error_to_response(e),
        },
        Err(e) => return error_to_response(e),
    };

    match request.format.as_str() {
        "json" => Json(bundle).into_response(),
        "html" => Html(render_html(&bundle)).into_response(),
        "pdf" => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(ErrorResponse {
                error: "PDF rendering is handled by an external typesetter".to_string(),
                code: "unsupported_format".to_string(),
            }),
        )
            .into_response(),
        other => bad_request(format!("unknown report format '{}'", other)),
    }
}

/// Minimal HTML emitter; styling belongs to downstream renderers
fn render_html(bundle: &crate::report::ReportBundle) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{}</title></head><body>", escape(&bundle.title)));
    html.push_str(&format!("<h1>{}</h1>", escape(&bundle.title)));
    html.push_str(&format!(
        "<p><strong>{}</strong> — {}</p>",
        escape(&bundle.executive_summary.status),
        escape(&bundle.executive_summary.headline)
    ));

    html.push_str("<h2>Metrics</h2><table border=\"1\">");
    for (name, value) in &bundle.metrics {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{:.1}</td></tr>",
            escape(name),
            value
        ));
    }
    html.push_str("</table>");

    html.push_str("<h2>Stages</h2><table border=\"1\">");
    for section in &bundle.stages {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&section.name),
            escape(&section.status),
            escape(&section.summary)
        ));
    }
    html.push_str("</table>");

    if !bundle.findings.is_empty() {
        html.push_str("<h2>Findings</h2><ul>");
        for finding in &bundle.findings {
            html.push_str(&format!("<li>{}</li>", escape(&finding.message)));
        }
        html.push_str("</ul>");
    }

    if !bundle.recommendations.is_empty() {
        html.push_str("<h2>Recommendations</h2><ul>");
        for recommendation in &bundle.recommendations {
            html.push_str(&format!("<li>{}</li>", escape(recommendation)));
        }
        html.push_str("</ul>");
    }

    html.push_str("</body></html>");
    html
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            code: "bad_request".to_string(),
        }),
    )
        .into_response()
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message,
            code: "not_found".to_string(),
        }),
    )
        .into_response()
}

fn internal(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message,
            code: "internal".to_string(),
        }),
    )
        .into_response()
}

fn error_to_response(e: AnalysisError) -> Response {
    let status = match &e {
        AnalysisError::Input(_) => StatusCode::BAD_REQUEST,
        AnalysisError::NotFound(_) => StatusCode::NOT_FOUND,
        AnalysisError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = Json(ErrorResponse {
        error: e.to_string(),
        code: e.code().to_string(),
    });
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, "no-store".parse().expect("static header"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ExecutiveSummary, ReportBundle};
    use std::collections::BTreeMap;

    #[test]
    fn test_render_html_escapes_content() {
        let bundle = ReportBundle {
            title: "Report <script>".to_string(),
            report_type: "analysis".to_string(),
            generated_at: chrono::Utc::now(),
            executive_summary: ExecutiveSummary {
                headline: "a & b".to_string(),
                status: "success".to_string(),
                highlights: vec![],
            },
            stages: vec![],
            metrics: BTreeMap::new(),
            findings: vec![],
            recommendations: vec![],
        };
        let html = render_html(&bundle);
        assert!(html.contains("Report &lt;script&gt;"));
        assert!(html.contains("a &amp; b"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize("pliego final v2.pdf"), "pliego_final_v2.pdf");
        assert_eq!(sanitize("../../etc/passwd"), ".._.._etc_passwd");
    }

    #[test]
    fn test_error_mapping() {
        let e = AnalysisError::Input(crate::error::InputError::EmptyDocument("x".to_string()));
        let response = error_to_response(e);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let e = AnalysisError::Dependency(
            crate::error::DependencyError::EmbeddingUnavailable("down".to_string()),
        );
        let response = error_to_response(e);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
