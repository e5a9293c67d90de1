//! Analysis orchestrator: drives the stage state machine
//!
//! ```text
//! IDLE -> EXTRACTING -> CHUNKING -> CLASSIFYING -> { VALIDATING, RISK, RUC } -> AGGREGATING -> DONE
//!                                         \-> FAILED (terminal, partial results retained)
//! ```
//!
//! Each stage persists its artifact atomically before the transition;
//! re-running with the same run id resumes from the last completed
//! stage. The three post-classification stages execute on a shared
//! flume worker pool and any one of them failing degrades the run to
//! partial success instead of failing it.

use crate::agents::classification::ClassificationAgent;
use crate::agents::comparison::{Comparison, ComparisonAgent};
use crate::agents::risk::RiskAgent;
use crate::agents::ruc::RucAgent;
use crate::agents::validation::ValidationAgent;
use crate::agents::{
    stage, AnalysisAgent, ClassificationResult, Finding, StageData, StageInput, StageProgress,
    StageResult,
};
use crate::artifacts::{AnalysisArtifact, ArtifactStore, OverallStatus};
use crate::catalog::Severity;
use crate::chunker::TextChunker;
use crate::context::{AnalysisContext, CancelToken, FRAGMENTS};
use crate::document::{AnalysisLevel, DocId, DocType, Document, Fragment, RunId};
use crate::error::{AnalysisError, Result, StageError};
use crate::extractor::DocumentExtractor;
use crate::store::VectorItem;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Status snapshot returned by the polling API; always well-formed
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub stage: String,
    /// Mean completed-fragment ratio across the active stages
    pub progress: f32,
    /// Present once the run reached a terminal state
    pub overall_status: Option<OverallStatus>,
    pub artifact_refs: Vec<String>,
}

/// Shared bookkeeping for an in-flight run
struct RunState {
    stage: Mutex<String>,
    active: Mutex<Vec<(String, Arc<StageProgress>)>>,
    cancel: CancelToken,
    outcome: Mutex<Option<OverallStatus>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            stage: Mutex::new("idle".to_string()),
            active: Mutex::new(Vec::new()),
            cancel: CancelToken::new(),
            outcome: Mutex::new(None),
        }
    }

    fn enter(&self, name: &str, progresses: Vec<(String, Arc<StageProgress>)>) {
        *self.stage.lock().expect("run state lock") = name.to_string();
        *self.active.lock().expect("run state lock") = progresses;
    }

    fn finish(&self, outcome: OverallStatus) {
        *self.outcome.lock().expect("run state lock") = Some(outcome);
        self.active.lock().expect("run state lock").clear();
    }

    fn progress(&self) -> f32 {
        if self.outcome.lock().expect("run state lock").is_some() {
            return 1.0;
        }
        let active = self.active.lock().expect("run state lock");
        if active.is_empty() {
            return 0.0;
        }
        active.iter().map(|(_, p)| p.ratio()).sum::<f32>() / active.len() as f32
    }
}

/// A job handed to the worker pool
type PoolJob = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Bounded worker pool owned by the orchestrator; the only place the
/// post-classification stages run
pub struct WorkerPool {
    tx: flume::Sender<PoolJob>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = flume::unbounded::<PoolJob>();
        for worker in 0..size.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                tracing::debug!("Stage worker {} ready", worker);
                while let Ok(job) = rx.recv_async().await {
                    job().await;
                }
            });
        }
        Self { tx }
    }

    /// Run a future on the pool and await its result
    pub async fn run<T, F>(&self, future: F) -> Result<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: PoolJob = Box::new(move || {
            async move {
                let _ = tx.send(future.await);
            }
            .boxed()
        });
        self.tx
            .send_async(job)
            .await
            .map_err(|_| AnalysisError::Generic(anyhow::anyhow!("worker pool is gone")))?;
        rx.await
            .map_err(|_| AnalysisError::Generic(anyhow::anyhow!("worker dropped the job")))
    }
}

/// The analysis orchestrator
pub struct Orchestrator {
    ctx: Arc<AnalysisContext>,
    artifacts: Arc<ArtifactStore>,
    pool: Arc<WorkerPool>,
    extractor: DocumentExtractor,
    chunker: TextChunker,
    runs: Arc<Mutex<HashMap<RunId, Arc<RunState>>>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<AnalysisContext>) -> Result<Self> {
        let artifacts = Arc::new(ArtifactStore::new(&ctx.config.data_root)?);
        let pool = Arc::new(WorkerPool::new(ctx.config.effective_pool_size()));
        let extractor = DocumentExtractor::new(ctx.config.extract.clone());
        let chunker = TextChunker::new(ctx.config.chunk.clone());

        Ok(Self {
            ctx,
            artifacts,
            pool,
            extractor,
            chunker,
            runs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Extract a file and compute its content fingerprint. Input
    /// errors surface here; the run has not started yet.
    pub async fn ingest(&self, path: &Path, declared: DocType) -> Result<Document> {
        let extracted = self.extractor.extract(path).await?;
        let doc_id = DocId::fingerprint(declared, &extracted.text);
        info!("Ingested {} as {}", path.display(), doc_id.short());

        Ok(Document {
            doc_id,
            path: path.to_path_buf(),
            declared_type: declared,
            detected_type: extracted.detected_type,
            text: extracted.text,
            page_count: extracted.page_count,
            table_count: extracted.table_count,
            created_at: Utc::now(),
        })
    }

    /// Start a run in the background and return its id immediately
    pub fn start(
        self: &Arc<Self>,
        document: Document,
        level: AnalysisLevel,
        force_rebuild: bool,
    ) -> RunId {
        let run_id = RunId::new(&document.doc_id, level);
        let orchestrator = Arc::clone(self);
        let spawned_run_id = run_id.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator
                .run_to_completion(document, level, force_rebuild)
                .await
            {
                error!("Run {} failed: {}", spawned_run_id, e);
            }
        });
        run_id
    }

    /// Execute (or resume) a run and return the final artifact
    pub async fn run_to_completion(
        &self,
        document: Document,
        level: AnalysisLevel,
        force_rebuild: bool,
    ) -> Result<AnalysisArtifact> {
        let run_id = RunId::new(&document.doc_id, level);

        // Cached artifact wins unless a rebuild was forced; anything
        // short of success resumes from the first incomplete stage
        if !force_rebuild {
            if let Some(existing) = self.artifacts.load_artifact(&run_id).await? {
                if existing.overall_status == OverallStatus::Success {
                    info!("Returning cached artifact for {}", run_id);
                    return Ok(existing);
                }
            }
        }

        let state = Arc::new(RunState::new());
        self.runs
            .lock()
            .expect("runs lock")
            .insert(run_id.clone(), Arc::clone(&state));

        let result = self
            .pipeline(&run_id, document, level, force_rebuild, &state)
            .await;

        match &result {
            Ok(artifact) => state.finish(artifact.overall_status),
            Err(e) => {
                state.finish(OverallStatus::Failed);
                // Fatal errors never expose a partial artifact
                if e.is_fatal() {
                    let _ = self.artifacts.delete_artifact(&run_id).await;
                }
            }
        }

        result
    }

    /// Request cooperative cancellation of a run
    pub fn cancel(&self, run_id: &RunId) -> bool {
        if let Some(state) = self.runs.lock().expect("runs lock").get(run_id) {
            state.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Poll the state of a run
    pub async fn status(&self, run_id: &RunId) -> Result<RunStatus> {
        let live = {
            let runs = self.runs.lock().expect("runs lock");
            runs.get(run_id).cloned()
        };

        let artifact = self.artifacts.load_artifact(run_id).await.ok().flatten();
        let artifact_refs = artifact
            .iter()
            .map(|a| format!("artifacts/{}.json", a.run_id))
            .collect();

        if let Some(state) = live {
            return Ok(RunStatus {
                run_id: run_id.clone(),
                stage: state.stage.lock().expect("run state lock").clone(),
                progress: state.progress(),
                overall_status: *state.outcome.lock().expect("run state lock"),
                artifact_refs,
            });
        }

        match artifact {
            Some(artifact) => Ok(RunStatus {
                run_id: run_id.clone(),
                stage: "done".to_string(),
                progress: 1.0,
                overall_status: Some(artifact.overall_status),
                artifact_refs,
            }),
            None => Err(AnalysisError::NotFound(format!("run {}", run_id))),
        }
    }

    /// Analyze a frozen set of documents and compare them
    pub async fn compare_documents(
        &self,
        documents: Vec<Document>,
        level: AnalysisLevel,
        force_rebuild: bool,
    ) -> Result<Comparison> {
        let mut artifacts = Vec::with_capacity(documents.len());
        for document in documents {
            artifacts.push(
                self.run_to_completion(document, level, force_rebuild)
                    .await?,
            );
        }

        let comparison = ComparisonAgent.compare(&self.ctx.catalog.taxonomy, &artifacts)?;
        self.artifacts.save_comparison(&comparison).await?;
        Ok(comparison)
    }

    async fn pipeline(
        &self,
        run_id: &RunId,
        document: Document,
        level: AnalysisLevel,
        force_rebuild: bool,
        state: &RunState,
    ) -> Result<AnalysisArtifact> {
        self.ctx.ensure_seeds().await?;

        let mut artifact = match self.artifacts.load_artifact(run_id).await? {
            Some(existing) if !force_rebuild => existing,
            _ => AnalysisArtifact::new(run_id.clone(), document.doc_id.clone(), level),
        };

        // EXTRACTING happened during ingest; record it once
        if !artifact.stage_succeeded(stage::EXTRACTING) {
            state.enter(stage::EXTRACTING, vec![]);
            let started = Utc::now();
            artifact.stage_results.insert(
                stage::EXTRACTING.to_string(),
                StageResult::success(
                    StageData::Extraction {
                        text_chars: document.text.chars().count(),
                        page_count: document.page_count,
                        table_count: document.table_count,
                        detected_type: document.detected_type,
                    },
                    started,
                ),
            );
            self.persist(&mut artifact).await?;
        }

        // CHUNKING: deterministic windows plus their embeddings.
        // A chunking failure is terminal; the partial artifact is kept.
        let fragments = match self
            .chunking_stage(run_id, &document, &mut artifact, state)
            .await?
        {
            Some(fragments) => fragments,
            None => return Ok(artifact),
        };

        // CLASSIFYING: critical; its failure fails the run
        let classification = match self
            .classifying_stage(run_id, &document, &fragments, &mut artifact, state)
            .await?
        {
            Some(classification) => classification,
            None => return Ok(artifact),
        };

        // VALIDATING / RISK / RUC run concurrently on the worker pool
        self.concurrent_stages(
            run_id,
            &document,
            &fragments,
            &classification,
            &mut artifact,
            state,
        )
        .await?;

        // AGGREGATING: fold stage outcomes into the final artifact
        state.enter(stage::AGGREGATING, vec![]);
        let started = Utc::now();
        artifact.overall_status = overall_status(&artifact);
        let (findings, recommendations) = synthesize(&self.ctx, &artifact);
        artifact.key_findings = findings;
        artifact.recommendations = recommendations;
        artifact.stage_results.insert(
            stage::AGGREGATING.to_string(),
            StageResult::success(StageData::None, started),
        );
        self.persist(&mut artifact).await?;

        info!(
            "Run {} finished with {:?}",
            run_id, artifact.overall_status
        );
        Ok(artifact)
    }

    async fn persist(&self, artifact: &mut AnalysisArtifact) -> Result<()> {
        artifact.updated_at = Utc::now();
        self.artifacts.save_artifact(artifact).await
    }

    /// Chunk the document and attach embeddings, reusing stored
    /// vectors when resuming a run whose chunking already succeeded
    async fn chunking_stage(
        &self,
        run_id: &RunId,
        document: &Document,
        artifact: &mut AnalysisArtifact,
        state: &RunState,
    ) -> Result<Option<Vec<Fragment>>> {
        let mut fragments = self.chunker.chunk(&document.doc_id, &document.text);
        if fragments.is_empty() {
            return Err(crate::error::InputError::EmptyDocument(
                document.path.display().to_string(),
            )
            .into());
        }

        if artifact.stage_succeeded(stage::CHUNKING) {
            if self.reload_vectors(run_id, &mut fragments).await? {
                return Ok(Some(fragments));
            }
            warn!("Stored vectors incomplete for {}, re-embedding", run_id);
        }

        let progress = Arc::new(StageProgress::default());
        state.enter(
            stage::CHUNKING,
            vec![(stage::CHUNKING.to_string(), Arc::clone(&progress))],
        );

        let budget = self.ctx.config.stages.budget(stage::CHUNKING);
        let started = Utc::now();
        progress.begin(fragments.len());

        let embed_result = timeout(budget, async {
            state.cancel.check(stage::CHUNKING)?;
            let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
            let batch = self.ctx.embedder.embed(&texts).await?;

            let mut items = Vec::with_capacity(fragments.len());
            for (fragment, vector) in fragments.iter_mut().zip(batch.vectors.iter()) {
                fragment.vector = Some(vector.clone());
                let mut metadata = HashMap::new();
                metadata.insert("doc_id".to_string(), fragment.doc_id.as_str().to_string());
                metadata.insert("ordinal".to_string(), fragment.ordinal.to_string());
                items.push(VectorItem {
                    id: format!("{}:{}", run_id, fragment.ordinal),
                    text: fragment.text.clone(),
                    metadata,
                    vector: vector.clone(),
                });
                progress.tick();
            }
            self.ctx.store.upsert(FRAGMENTS, items).await?;
            Ok::<_, AnalysisError>(batch)
        })
        .await;

        let stage_result = match embed_result {
            Ok(Ok(batch)) => {
                progress.finish();
                StageResult::success(
                    StageData::Chunking {
                        fragment_count: fragments.len(),
                        total_chars: document.text.chars().count(),
                        embedding_provider: batch.provider,
                        embedding_model: batch.model,
                        embedding_dimension: batch.dimension,
                    },
                    started,
                )
            }
            Ok(Err(e)) => {
                self.rollback_vectors(run_id).await;
                if e.is_fatal() {
                    return Err(e);
                }
                StageResult::failed(&e, started)
            }
            Err(_) => {
                self.rollback_vectors(run_id).await;
                let e = StageError::StageTimeout {
                    stage: stage::CHUNKING.to_string(),
                    budget_ms: budget.as_millis() as u64,
                }
                .into();
                StageResult::failed(&e, started)
            }
        };

        let ok = stage_result.is_success();
        artifact
            .stage_results
            .insert(stage::CHUNKING.to_string(), stage_result);

        if !ok {
            artifact.overall_status = OverallStatus::Failed;
            self.persist(artifact).await?;
            return Ok(None);
        }

        self.persist(artifact).await?;
        Ok(Some(fragments))
    }

    /// Fetch previously stored vectors for every fragment; true when
    /// all of them were found
    async fn reload_vectors(&self, run_id: &RunId, fragments: &mut [Fragment]) -> Result<bool> {
        for fragment in fragments.iter_mut() {
            let id = format!("{}:{}", run_id, fragment.ordinal);
            match self.ctx.store.get(FRAGMENTS, &id).await? {
                Some(item) => fragment.vector = Some(item.vector),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn rollback_vectors(&self, run_id: &RunId) {
        let prefix = format!("{}:", run_id);
        if let Err(e) = self.ctx.store.delete_prefix(FRAGMENTS, &prefix).await {
            warn!("Vector rollback for {} failed: {}", run_id, e);
        }
    }

    async fn classifying_stage(
        &self,
        run_id: &RunId,
        document: &Document,
        fragments: &[Fragment],
        artifact: &mut AnalysisArtifact,
        state: &RunState,
    ) -> Result<Option<ClassificationResult>> {
        if let Some(existing) = artifact.classification() {
            return Ok(Some(existing.clone()));
        }

        let progress = Arc::new(StageProgress::default());
        state.enter(
            stage::CLASSIFYING,
            vec![(stage::CLASSIFYING.to_string(), Arc::clone(&progress))],
        );

        let budget = self.ctx.config.stages.budget(stage::CLASSIFYING);
        let started = Utc::now();
        let input = StageInput {
            run_id,
            document,
            fragments,
            classification: None,
            cancel: &state.cancel,
            progress: Arc::clone(&progress),
        };

        let outcome = timeout(budget, ClassificationAgent.run(&self.ctx, &input)).await;
        let stage_result = match outcome {
            Ok(Ok(data)) => StageResult::success(data, started),
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => StageResult::failed(&e, started),
            Err(_) => StageResult::failed(
                &StageError::StageTimeout {
                    stage: stage::CLASSIFYING.to_string(),
                    budget_ms: budget.as_millis() as u64,
                }
                .into(),
                started,
            ),
        };

        let ok = stage_result.is_success();
        artifact
            .stage_results
            .insert(stage::CLASSIFYING.to_string(), stage_result);

        if !ok {
            // Classification is critical: downstream stages are skipped
            for name in stage::CONCURRENT {
                artifact
                    .stage_results
                    .entry(name.to_string())
                    .or_insert_with(|| StageResult::skipped("classification failed"));
            }
            artifact.overall_status = OverallStatus::Failed;
            self.persist(artifact).await?;
            return Ok(None);
        }

        self.persist(artifact).await?;
        Ok(artifact.classification().cloned())
    }

    async fn concurrent_stages(
        &self,
        run_id: &RunId,
        document: &Document,
        fragments: &[Fragment],
        classification: &ClassificationResult,
        artifact: &mut AnalysisArtifact,
        state: &RunState,
    ) -> Result<()> {
        let pending: Vec<&'static str> = stage::CONCURRENT
            .into_iter()
            .filter(|name| !artifact.stage_succeeded(name))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let document = Arc::new(document.clone());
        let fragments: Arc<Vec<Fragment>> = Arc::new(fragments.to_vec());
        let classification = Arc::new(classification.clone());

        let mut progresses = Vec::new();
        let mut handles = Vec::new();

        for name in pending {
            let progress = Arc::new(StageProgress::default());
            progresses.push((name.to_string(), Arc::clone(&progress)));

            let ctx = Arc::clone(&self.ctx);
            let run_id = run_id.clone();
            let document = Arc::clone(&document);
            let fragments = Arc::clone(&fragments);
            let classification = Arc::clone(&classification);
            let cancel = state.cancel.clone();
            let budget = self.ctx.config.stages.budget(name);

            let future = async move {
                let started = Utc::now();
                let input = StageInput {
                    run_id: &run_id,
                    document: &document,
                    fragments: &fragments,
                    classification: Some(&classification),
                    cancel: &cancel,
                    progress,
                };

                let agent: Box<dyn AnalysisAgent> = match name {
                    stage::VALIDATING => Box::new(ValidationAgent),
                    stage::RISK => Box::new(RiskAgent),
                    _ => Box::new(RucAgent),
                };

                let outcome = timeout(budget, agent.run(&ctx, &input)).await;
                let result = match outcome {
                    Ok(Ok(data)) => StageResult::success(data, started),
                    Ok(Err(e)) => StageResult::failed(&e, started),
                    Err(_) => StageResult::failed(
                        &StageError::StageTimeout {
                            stage: name.to_string(),
                            budget_ms: budget.as_millis() as u64,
                        }
                        .into(),
                        started,
                    ),
                };
                (name, result)
            };

            handles.push(self.pool.run(future));
        }

        state.enter("analyzing", progresses);

        let results = futures::future::join_all(handles).await;
        for result in results {
            let (name, stage_result) = result?;
            if !stage_result.is_success() {
                warn!(
                    "Stage {} failed for {}: {:?}",
                    name, run_id, stage_result.errors
                );
            }
            artifact
                .stage_results
                .insert(name.to_string(), stage_result);
        }

        self.persist(artifact).await?;
        Ok(())
    }
}

/// Fold per-stage outcomes into the run outcome
fn overall_status(artifact: &AnalysisArtifact) -> OverallStatus {
    if !artifact.stage_succeeded(stage::CLASSIFYING) {
        return OverallStatus::Failed;
    }

    let succeeded = stage::CONCURRENT
        .iter()
        .filter(|name| artifact.stage_succeeded(name))
        .count();

    match succeeded {
        3 => OverallStatus::Success,
        0 => OverallStatus::Failed,
        _ => OverallStatus::PartialSuccess,
    }
}

/// Synthesize key findings and recommendations from the stage results
/// via the canned (stage, severity, category) template table
fn synthesize(ctx: &AnalysisContext, artifact: &AnalysisArtifact) -> (Vec<Finding>, Vec<String>) {
    let catalog = &ctx.catalog;
    let mut findings = Vec::new();
    let mut push = |stage_name: &str, severity: Severity, category: &str, detail: String| {
        if let Some(rule) = catalog.finding_template(stage_name, severity, category) {
            findings.push(Finding {
                stage: stage_name.to_string(),
                severity,
                category: category.to_string(),
                message: rule.template.replace("{detail}", &detail),
            });
        }
    };

    if let Some(classification) = artifact.classification() {
        let found = classification.found_sections().len();
        if found < 5 {
            push(
                stage::CLASSIFYING,
                Severity::Warning,
                "coverage",
                format!("only {} of 9 taxonomy sections were found", found),
            );
        }
    }

    if let Some(validation) = artifact.validation() {
        if validation.level == crate::agents::validation::ValidationLevel::Rechazado {
            push(
                stage::VALIDATING,
                Severity::Critical,
                "structural",
                validation.summary.clone(),
            );
        }
        if validation.compliance.overall_pct < 0.8 {
            let missing: Vec<String> = validation
                .compliance
                .by_category
                .values()
                .flat_map(|c| c.missing.iter().cloned())
                .collect();
            push(
                stage::VALIDATING,
                Severity::Warning,
                "compliance",
                format!("{} rules unmet ({})", missing.len(), missing.join(", ")),
            );
        }
        if !validation.dates.has_adequate_dates {
            push(
                stage::VALIDATING,
                Severity::Warning,
                "dates",
                format!(
                    "{} dates and {} deadline markers found",
                    validation.dates.count, validation.dates.deadlines
                ),
            );
        }
    }

    if let Some(risk) = artifact.risk() {
        if risk.overall_level.at_least_high() {
            push(
                stage::RISK,
                Severity::Critical,
                "overall",
                format!("total score {:.0}/100", risk.total_score),
            );
        } else if !risk.matrix.high.is_empty() {
            push(
                stage::RISK,
                Severity::Warning,
                "category",
                risk.matrix.high.join(", "),
            );
        }
    }

    if let Some(ruc) = artifact.ruc() {
        match ruc.bucket {
            crate::agents::ruc::RucBucket::Deficiente => push(
                stage::RUC,
                Severity::Warning,
                "registry",
                format!("{} candidates, best score {:.0}", ruc.found.len(), ruc.score),
            ),
            _ => push(
                stage::RUC,
                Severity::Info,
                "registry",
                format!("score {:.0} ({})", ruc.score, ruc.bucket.as_str()),
            ),
        }
    }

    let mut recommendations = Vec::new();
    if let Some(validation) = artifact.validation() {
        recommendations.extend(validation.recommendations.iter().cloned());
    }
    if let Some(risk) = artifact.risk() {
        for mitigation in &risk.mitigations {
            if !recommendations.contains(mitigation) {
                recommendations.push(mitigation.clone());
            }
        }
    }

    (findings, recommendations)
}
