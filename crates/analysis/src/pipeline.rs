use crate::aggregate::{DedupConfig, IssueAggregator};
use crate::error::{PipelineError, Result};
use crate::parser::{parse, ExpectedSchema, ParseOutcome};
use crate::prompts::{analysis_prompt, PriorFindings};
use codemend_chunker::{AnalysisChunk, Chunker, ChunkerConfig};
use codemend_fingerprint::{compute_fingerprint, diff, ScanOptions};
use codemend_inference::{CancellationToken, InferenceClient, InferenceError, InferenceErrorKind};
use codemend_memory::{MemoryError, MemoryRecord, MemoryStore};
use codemend_protocol::{
    unix_now_ms, AnalysisReport, AnalysisType, ProjectId, ReportMeta, RunWarning, SourceFile,
    WarningKind,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub scan: ScanOptions,
    pub chunker: ChunkerConfig,
    pub model: String,
    pub temperature: f32,
    /// Per-attempt timeout for one chunk request.
    pub timeout: Duration,
    pub workers: usize,
    pub min_issues: usize,
    pub analysis_types: Vec<AnalysisType>,
    pub dedup: DedupConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            chunker: ChunkerConfig::default(),
            model: "codellama:34b".to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(120),
            workers: 4,
            min_issues: 2,
            analysis_types: vec![
                AnalysisType::Standard,
                AnalysisType::Security,
                AnalysisType::Performance,
            ],
            dedup: DedupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Ignore stored fingerprints and reanalyze every file.
    pub fresh: bool,
    /// Persist what was gathered when the run is cancelled.
    pub save_partial: bool,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub record: MemoryRecord,
    pub skipped_files: Vec<String>,
    pub chunks: usize,
    pub requests: usize,
}

struct Job {
    chunk: Arc<AnalysisChunk>,
    analysis_type: AnalysisType,
}

impl Job {
    fn files(&self) -> Vec<String> {
        let unique: BTreeSet<&str> = self.chunk.file_paths().collect();
        unique.into_iter().map(str::to_string).collect()
    }
}

enum JobResult {
    /// Never sent: the run was cancelled before a worker picked the job up.
    NotStarted,
    Parsed(ParseOutcome),
    Failed(InferenceError),
}

struct JobOutcome {
    job: Job,
    result: JobResult,
}

/// Runs the analysis pipeline for one project root.
pub struct Analyzer {
    client: InferenceClient,
    store: Arc<dyn MemoryStore>,
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(client: InferenceClient, store: Arc<dyn MemoryStore>, config: AnalysisConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub async fn analyze(
        &self,
        root: &Path,
        options: AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome> {
        let root = canonical_root(root).await?;
        let project_id = ProjectId::from_root(&root);
        let project_root = root.display().to_string();
        log::info!("Analyzing {project_root} (project {project_id})");

        let scan_root = root.clone();
        let scan_options = self.config.scan.clone();
        let scan = tokio::task::spawn_blocking(move || compute_fingerprint(&scan_root, &scan_options))
            .await??;
        log::info!("Scanned {} file(s)", scan.fingerprint.len());

        let previous = if options.fresh {
            log::info!("Fresh run: ignoring stored fingerprints");
            None
        } else {
            self.previous_run(&project_id).await
        };

        let mut warnings: Vec<RunWarning> = scan
            .unreadable
            .iter()
            .map(|(path, reason)| {
                RunWarning::new(WarningKind::Unreadable, reason.clone()).for_file(path.clone())
            })
            .collect();

        let mut to_analyze: Vec<SourceFile> = Vec::new();
        let mut skipped_files: Vec<String> = Vec::new();
        let mut carried = Vec::new();
        let mut prior = Vec::new();
        match &previous {
            Some((record, report)) => {
                let delta = diff(&record.fingerprint, &scan.fingerprint);
                if delta.is_empty() {
                    log::info!("No files changed since the last run");
                } else {
                    log::info!(
                        "Since the last run: {} changed, {} added, {} removed",
                        delta.changed.len(),
                        delta.added.len(),
                        delta.removed.len()
                    );
                }
                let dirty: HashSet<&str> = delta.dirty().map(String::as_str).collect();
                let blocked: HashSet<&str> = report
                    .warnings
                    .iter()
                    .filter(|w| w.blocks_reuse())
                    .flat_map(|w| w.files.iter().map(String::as_str))
                    .collect();
                for source in scan.sources {
                    let unchanged = !dirty.contains(source.rel_path.as_str())
                        && !blocked.contains(source.rel_path.as_str());
                    if unchanged {
                        carried.extend(report.issues_for_file(&source.rel_path).cloned());
                        skipped_files.push(source.rel_path);
                    } else {
                        prior.extend(report.issues_for_file(&source.rel_path).cloned());
                        to_analyze.push(source);
                    }
                }
            }
            None => to_analyze = scan.sources,
        }
        match skipped_files.len() {
            0 => {}
            1 => log::info!("1 file skipped (unchanged)"),
            n => log::info!("{n} files skipped (unchanged)"),
        }

        let chunker = Chunker::new(self.config.chunker.clone())?;
        let chunks: Vec<Arc<AnalysisChunk>> = chunker.plan(&to_analyze).iter().map(Arc::new).collect();
        let jobs = self.plan_jobs(&chunks);
        log::info!(
            "{} file(s) to analyze in {} chunk(s), {} request(s)",
            to_analyze.len(),
            chunks.len(),
            jobs.len()
        );

        let mut outstanding: HashMap<String, usize> =
            to_analyze.iter().map(|s| (s.rel_path.clone(), 0)).collect();
        for job in &jobs {
            for file in job.files() {
                *outstanding.entry(file).or_default() += 1;
            }
        }

        let prior = Arc::new(PriorFindings::from_issues(prior));
        if !prior.is_empty() {
            log::debug!("Re-analyzed files carry their previous findings into the prompt");
        }

        let run_token = cancel.child_token();
        let mut join_set = self.spawn_jobs(jobs, &prior, &run_token);

        let mut aggregator = IssueAggregator::new(self.config.dedup);
        aggregator.extend(carried);
        let mut unreachable: Option<String> = None;
        let mut requests = 0usize;

        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::error!("Analysis worker failed: {err}");
                    warnings.push(RunWarning::new(
                        WarningKind::InferenceFailure,
                        format!("worker failed: {err}"),
                    ));
                    continue;
                }
            };
            let files = outcome.job.files();
            let chunk_index = outcome.job.chunk.index;
            let analysis_type = outcome.job.analysis_type;

            match outcome.result {
                JobResult::NotStarted => continue,
                JobResult::Parsed(parsed) => {
                    requests += 1;
                    if let Some(failure) = parsed.failure {
                        log::warn!(
                            "Chunk {chunk_index} ({analysis_type}): unparseable reply: {}",
                            failure.reason
                        );
                        warnings.push(
                            RunWarning::new(
                                WarningKind::ParseFailure,
                                format!("{analysis_type}: {}: {}", failure.reason, failure.raw_excerpt),
                            )
                            .for_files(files.iter().cloned())
                            .for_chunk(chunk_index),
                        );
                    }
                    log::debug!(
                        "Chunk {chunk_index} ({analysis_type}): {} issue(s) via {:?}",
                        parsed.issues.len(),
                        parsed.strategy
                    );
                    aggregator.extend(parsed.issues);
                }
                JobResult::Failed(err) => match err.kind {
                    InferenceErrorKind::Cancelled => continue,
                    InferenceErrorKind::ConnectionRefused => {
                        if unreachable.is_none() {
                            log::error!("Inference service unreachable, stopping run: {err}");
                            unreachable = Some(err.to_string());
                            run_token.cancel();
                        }
                        continue;
                    }
                    _ => {
                        requests += 1;
                        log::warn!("Chunk {chunk_index} ({analysis_type}) failed: {err}");
                        warnings.push(
                            RunWarning::new(
                                WarningKind::InferenceFailure,
                                format!("{analysis_type}: {err}"),
                            )
                            .for_files(files.iter().cloned())
                            .for_chunk(chunk_index),
                        );
                    }
                },
            }

            for file in files {
                if let Some(count) = outstanding.get_mut(&file) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        if let Some(message) = unreachable {
            return Err(PipelineError::ServiceUnreachable(message));
        }

        let files_analyzed = outstanding.values().filter(|n| **n == 0).count();
        let partial = files_analyzed < outstanding.len();
        if partial && cancel.is_cancelled() && !options.save_partial {
            log::warn!("Analysis cancelled; nothing was saved");
            return Err(PipelineError::Cancelled);
        }
        if partial {
            log::warn!(
                "Partial report: {files_analyzed} of {} file(s) fully analyzed",
                outstanding.len()
            );
        }

        for warning in warnings {
            aggregator.push_warning(warning);
        }
        let report = aggregator.finish(ReportMeta {
            project_id: project_id.clone(),
            project_root: project_root.clone(),
            generated_at_unix_ms: unix_now_ms(),
            files_analyzed,
            files_skipped: skipped_files.len(),
            partial,
        });
        log::info!(
            "Report {}: {} issue(s), {} warning(s)",
            report.report_id,
            report.total_issues,
            report.warnings.len()
        );

        let record = self
            .persist(&project_id, &project_root, &report, scan.fingerprint)
            .await?;

        Ok(AnalysisOutcome {
            report,
            record,
            skipped_files,
            chunks: chunks.len(),
            requests,
        })
    }

    fn plan_jobs(&self, chunks: &[Arc<AnalysisChunk>]) -> Vec<Job> {
        let mut types: Vec<AnalysisType> = Vec::new();
        for analysis_type in &self.config.analysis_types {
            if !types.contains(analysis_type) {
                types.push(*analysis_type);
            }
        }

        let mut jobs = Vec::new();
        for chunk in chunks {
            for analysis_type in &types {
                if chunk.line_count() >= analysis_type.min_lines() {
                    jobs.push(Job {
                        chunk: Arc::clone(chunk),
                        analysis_type: *analysis_type,
                    });
                }
            }
        }
        jobs
    }

    fn spawn_jobs(
        &self,
        jobs: Vec<Job>,
        prior: &Arc<PriorFindings>,
        token: &CancellationToken,
    ) -> JoinSet<JobOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut join_set = JoinSet::new();

        for job in jobs {
            let semaphore = semaphore.clone();
            let token = token.clone();
            let prior = Arc::clone(prior);
            let client = self.client.clone();
            let model = self.config.model.clone();
            let temperature = self.config.temperature;
            let timeout = self.config.timeout;
            let min_issues = self.config.min_issues;

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return JobOutcome {
                        job,
                        result: JobResult::NotStarted,
                    };
                };
                if token.is_cancelled() {
                    return JobOutcome {
                        job,
                        result: JobResult::NotStarted,
                    };
                }

                let prompt = analysis_prompt(&job.chunk, job.analysis_type, min_issues, &prior);
                let result = match client
                    .request(&prompt, &model, temperature, timeout, &token)
                    .await
                {
                    Ok(raw) => {
                        JobResult::Parsed(parse(&raw, &ExpectedSchema::new(&job.chunk, job.analysis_type)))
                    }
                    Err(err) => JobResult::Failed(err),
                };
                JobOutcome { job, result }
            });
        }
        join_set
    }

    /// Previous record and its latest report. Anything unreadable means a full run.
    async fn previous_run(&self, project_id: &ProjectId) -> Option<(MemoryRecord, AnalysisReport)> {
        let record = match self.store.load_optional(project_id).await {
            Ok(record) => record?,
            Err(err) => {
                log::warn!("Ignoring unreadable memory record: {err}");
                return None;
            }
        };
        let latest = record.latest_report.clone()?;
        if latest.partial {
            log::info!("Previous report {} is partial; analyzing every file", latest.report_id);
            return None;
        }
        match self.store.load_report(project_id, &latest.report_id).await {
            Ok(report) => Some((record, report)),
            Err(err) => {
                log::warn!("Previous report unavailable, analyzing every file: {err}");
                None
            }
        }
    }

    async fn persist(
        &self,
        project_id: &ProjectId,
        project_root: &str,
        report: &AnalysisReport,
        fingerprint: codemend_fingerprint::ProjectFingerprint,
    ) -> Result<MemoryRecord> {
        self.store.save_report(report).await?;

        let linked = report.clone();
        let id = project_id.clone();
        let root = project_root.to_string();
        let fallback_fingerprint = fingerprint.clone();
        let updated = self
            .store
            .update(
                project_id,
                Box::new(move |current: Option<MemoryRecord>| {
                    let mut record = current.unwrap_or_else(|| MemoryRecord::new(id, root));
                    record.link_report(&linked, fingerprint);
                    record
                }),
            )
            .await;

        match updated {
            Ok(record) => Ok(record),
            Err(MemoryError::Corrupt { path, message }) => {
                log::warn!("Replacing corrupt memory record {path}: {message}");
                let mut record = MemoryRecord::new(project_id.clone(), project_root);
                record.link_report(report, fallback_fingerprint);
                self.store.save(&record).await?;
                Ok(record)
            }
            Err(err) => Err(err.into()),
        }
    }
}

async fn canonical_root(root: &Path) -> Result<PathBuf> {
    let invalid = |err: std::io::Error| PipelineError::InvalidPath(format!("{}: {err}", root.display()));
    let metadata = tokio::fs::metadata(root).await.map_err(invalid)?;
    if !metadata.is_dir() {
        return Err(PipelineError::InvalidPath(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    tokio::fs::canonicalize(root).await.map_err(invalid)
}
