//! Per-job orchestration: build → submit → wait → fetch → reconcile.
//!
//! A [`BatchJobContext`] owns the provider client, settings and private
//! workspace of one job. Phases run sequentially and every phase updates the
//! `job.json` manifest so an interrupted run can be resumed by job id.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::paths::JobWorkspace;
use crate::pipeline::{
    BuildReport, ChunkingPolicy, DecisionMap, DecisionRule, GenerationSettings, JsonlSink,
    ReconcileReport, RecordReader, RequestBuilder, merge, parse_results,
};
use crate::services::context::{BatchJobClient, JobHandle, PipelineError, PipelineResult};
use crate::services::fetch::{FetchedResults, ResultFetcher};
use crate::services::manifest::{JobKind, JobManifest};
use crate::services::poller::JobPoller;
use crate::services::submit::JobSubmitter;

/// Settings shared by every phase of a job.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub generation: GenerationSettings,
    pub id_field: String,
    pub summary_fields: Vec<String>,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
    pub accept_value: JsonValue,
    pub split_missing: bool,
}

impl LifecycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            generation: config.generation.clone(),
            id_field: config.records.id_field.clone(),
            summary_fields: config.records.summary_fields.clone(),
            poll_interval: Duration::from_secs(config.polling.interval_secs),
            poll_timeout: config.polling.timeout_secs.map(Duration::from_secs),
            accept_value: config.reconcile.accept_value.clone(),
            split_missing: config.reconcile.split_missing,
        }
    }
}

/// Destination files of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutputs {
    pub accepted: PathBuf,
    pub rejected: PathBuf,
    pub missing: Option<PathBuf>,
    pub generations: Option<PathBuf>,
}

impl ReconcileOutputs {
    pub fn in_dir(dir: &Path, split_missing: bool, rule: &DecisionRule) -> Self {
        Self {
            accepted: dir.join("accepted.jsonl"),
            rejected: dir.join("rejected.jsonl"),
            missing: split_missing.then(|| dir.join("missing.jsonl")),
            generations: matches!(rule, DecisionRule::AnyOutput)
                .then(|| dir.join("generations.jsonl")),
        }
    }

    fn for_workspace(workspace: &JobWorkspace, split_missing: bool, rule: &DecisionRule) -> Self {
        Self {
            accepted: workspace.accepted_path(),
            rejected: workspace.rejected_path(),
            missing: split_missing.then(|| workspace.missing_path()),
            generations: matches!(rule, DecisionRule::AnyOutput)
                .then(|| workspace.generations_path()),
        }
    }
}

/// Parse a raw result artifact and merge it against the original records.
///
/// The decision map is fully built before the merge starts. Outputs are
/// written next to their destinations and renamed into place only after the
/// merge completes; on failure no output file is replaced.
pub fn reconcile_files(
    input: &Path,
    raw_results: &Path,
    id_field: &str,
    policy: ChunkingPolicy,
    rule: &DecisionRule,
    outputs: &ReconcileOutputs,
) -> PipelineResult<ReconcileReport> {
    let raw = BufReader::new(File::open(raw_results)?);
    let (decisions, parse_report) = parse_results(raw, policy.is_chunked())?;

    let records = RecordReader::new(BufReader::new(File::open(input)?), id_field);
    let mut staged = StagedOutputs::default();
    match merge_into(records, &decisions, rule, outputs, &mut staged) {
        Ok(mut report) => {
            staged.commit()?;
            report.parse = parse_report;
            Ok(report)
        }
        Err(err) => {
            staged.discard();
            Err(err)
        }
    }
}

fn merge_into<R: BufRead>(
    records: RecordReader<R>,
    decisions: &DecisionMap,
    rule: &DecisionRule,
    outputs: &ReconcileOutputs,
    staged: &mut StagedOutputs,
) -> PipelineResult<ReconcileReport> {
    let mut sink = JsonlSink::new(
        staged.create(&outputs.accepted)?,
        staged.create(&outputs.rejected)?,
    );
    if let Some(path) = &outputs.missing {
        sink = sink.with_missing(staged.create(path)?);
    }
    if let Some(path) = &outputs.generations {
        sink = sink.with_generations(staged.create(path)?);
    }
    Ok(merge(records, decisions, rule, &mut sink)?)
}

/// Runs [`reconcile_files`] on the blocking pool.
async fn reconcile_files_blocking(
    input: PathBuf,
    raw_results: PathBuf,
    id_field: String,
    policy: ChunkingPolicy,
    rule: DecisionRule,
    outputs: ReconcileOutputs,
) -> PipelineResult<ReconcileReport> {
    tokio::task::spawn_blocking(move || {
        reconcile_files(&input, &raw_results, &id_field, policy, &rule, &outputs)
    })
    .await?
}

/// Output files written under a temporary name until the merge succeeds.
#[derive(Default)]
struct StagedOutputs {
    files: Vec<(PathBuf, PathBuf)>,
}

impl StagedOutputs {
    fn create(&mut self, dest: &Path) -> PipelineResult<BufWriter<File>> {
        let mut name = dest.as_os_str().to_owned();
        name.push(".tmp");
        let staging = PathBuf::from(name);
        let writer = create(&staging)?;
        self.files.push((staging, dest.to_path_buf()));
        Ok(writer)
    }

    fn commit(self) -> PipelineResult<()> {
        for (staging, dest) in &self.files {
            std::fs::rename(staging, dest)?;
        }
        Ok(())
    }

    fn discard(self) {
        for (staging, _) in &self.files {
            if let Err(err) = std::fs::remove_file(staging) {
                tracing::debug!(path = %staging.display(), error = %err, "staged output not removed");
            }
        }
    }
}

fn create(path: &Path) -> PipelineResult<BufWriter<File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Build the request artifact for `input` into `out`.
pub fn build_request_file(
    input: &Path,
    out: &Path,
    policy: ChunkingPolicy,
    settings: &LifecycleSettings,
) -> PipelineResult<BuildReport> {
    let builder = RequestBuilder::new(policy, &settings.generation)?
        .with_summary_fields(settings.summary_fields.clone());
    let records = RecordReader::new(BufReader::new(File::open(input)?), settings.id_field.as_str());
    let report = builder.write_artifact(records, create(out)?)?;
    if report.requests == 0 {
        return Err(PipelineError::message(format!(
            "no requests built from {}",
            input.display()
        )));
    }
    Ok(report)
}

/// Result of a full lifecycle run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub build: BuildReport,
    pub handle: JobHandle,
    pub fetched: FetchedResults,
    pub reconcile: ReconcileReport,
}

/// Client, settings and workspace of one batch job.
pub struct BatchJobContext {
    client: Arc<dyn BatchJobClient>,
    settings: LifecycleSettings,
    workspace: JobWorkspace,
    manifest: JobManifest,
    cancel: CancellationToken,
}

impl BatchJobContext {
    /// Start a new job in a fresh workspace under `output_root`.
    pub async fn create(
        client: Arc<dyn BatchJobClient>,
        settings: LifecycleSettings,
        output_root: &Path,
        job_name: &str,
        kind: JobKind,
        policy: ChunkingPolicy,
        input: &Path,
    ) -> PipelineResult<Self> {
        if !input.is_file() {
            return Err(PipelineError::message(format!(
                "input file {} does not exist",
                input.display()
            )));
        }
        let input = std::path::absolute(input)?;
        let workspace = JobWorkspace::create(output_root, job_name)?;
        let manifest = JobManifest::new(
            workspace.job_id(),
            kind,
            policy,
            input,
            settings.id_field.as_str(),
        );
        manifest.save(&workspace.manifest_path()).await?;
        tracing::info!(
            job = %workspace.job_id(),
            dir = %workspace.dir().display(),
            "job workspace created"
        );
        Ok(Self {
            client,
            settings,
            workspace,
            manifest,
            cancel: CancellationToken::new(),
        })
    }

    /// Reopen an existing workspace from its manifest.
    pub async fn open(
        client: Arc<dyn BatchJobClient>,
        settings: LifecycleSettings,
        dir: &Path,
    ) -> PipelineResult<Self> {
        let workspace = JobWorkspace::open(dir)?;
        let manifest = JobManifest::load(&workspace.manifest_path()).await?;
        Ok(Self {
            client,
            settings,
            workspace,
            manifest,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workspace(&self) -> &JobWorkspace {
        &self.workspace
    }

    pub fn manifest(&self) -> &JobManifest {
        &self.manifest
    }

    pub fn decision_rule(&self) -> DecisionRule {
        self.manifest.kind.decision_rule(&self.settings.accept_value)
    }

    /// Write the request artifact into the workspace.
    pub fn prepare(&self) -> PipelineResult<BuildReport> {
        build_request_file(
            &self.manifest.input_path,
            &self.workspace.requests_path(),
            self.manifest.policy,
            &self.settings,
        )
    }

    pub async fn submit(&mut self) -> PipelineResult<JobHandle> {
        let submitter = JobSubmitter::new(self.client.as_ref());
        let result = submitter
            .submit(&self.workspace.requests_path(), self.workspace.job_id())
            .await;
        match result {
            Ok(handle) => {
                self.record(&handle).await?;
                Ok(handle)
            }
            Err(PipelineError::OrphanedUpload { file, source }) => {
                self.manifest.uploaded_file = Some(file.clone());
                self.manifest.error = Some(source.to_string());
                self.manifest.save(&self.workspace.manifest_path()).await?;
                Err(PipelineError::OrphanedUpload { file, source })
            }
            Err(err) => Err(err),
        }
    }

    /// Re-query the provider for the job recorded in the manifest, or for
    /// `job_id` when given. A `job_id` other than the recorded one is refused.
    pub async fn resume(&mut self, job_id: Option<&str>) -> PipelineResult<JobHandle> {
        let job_id = match (job_id, self.manifest.provider_job_id.as_deref()) {
            (Some(requested), Some(recorded)) if requested != recorded => {
                return Err(PipelineError::JobIdMismatch {
                    recorded: recorded.to_string(),
                    requested: requested.to_string(),
                });
            }
            (Some(job_id), _) => job_id.to_string(),
            (None, _) => self.provider_job_id()?,
        };
        let handle = JobHandle::resume(self.client.as_ref(), &job_id).await?;
        self.record(&handle).await?;
        Ok(handle)
    }

    /// Block until the job succeeds, fails, times out or is cancelled.
    pub async fn wait(&mut self) -> PipelineResult<JobHandle> {
        let job_id = self.provider_job_id()?;
        let poller = JobPoller::new(self.client.as_ref(), self.settings.poll_interval)
            .with_timeout(self.settings.poll_timeout)
            .with_cancellation(self.cancel.clone());
        match poller.wait(&job_id).await {
            Ok(handle) => {
                self.record(&handle).await?;
                Ok(handle)
            }
            Err(PipelineError::JobDidNotSucceed {
                job_id,
                state,
                message,
            }) => {
                self.manifest.last_state = Some(state);
                self.manifest.error = message.clone();
                self.manifest.save(&self.workspace.manifest_path()).await?;
                Err(PipelineError::JobDidNotSucceed {
                    job_id,
                    state,
                    message,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn fetch(&mut self, handle: &JobHandle) -> PipelineResult<FetchedResults> {
        let fetcher = ResultFetcher::new(self.client.as_ref());
        fetcher.fetch(handle, &self.workspace.raw_results_path()).await
    }

    /// Reconcile the stored raw results against the job input.
    pub async fn reconcile(&self) -> PipelineResult<ReconcileReport> {
        let rule = self.decision_rule();
        let outputs =
            ReconcileOutputs::for_workspace(&self.workspace, self.settings.split_missing, &rule);
        reconcile_files_blocking(
            self.manifest.input_path.clone(),
            self.workspace.raw_results_path(),
            self.manifest.id_field.clone(),
            self.manifest.policy,
            rule,
            outputs,
        )
        .await
    }

    /// Run every phase in order.
    pub async fn run(&mut self) -> PipelineResult<RunSummary> {
        let build = self.prepare()?;
        tracing::info!(
            job = %self.workspace.job_id(),
            requests = build.requests,
            records = build.records,
            "requests prepared"
        );
        self.submit().await?;
        let handle = self.wait().await?;
        let fetched = self.fetch(&handle).await?;
        let reconcile = self.reconcile().await?;
        Ok(RunSummary {
            build,
            handle,
            fetched,
            reconcile,
        })
    }

    fn provider_job_id(&self) -> PipelineResult<String> {
        self.manifest.provider_job_id.clone().ok_or_else(|| {
            PipelineError::message(format!(
                "job {} has no provider job id; submit it first",
                self.workspace.job_id()
            ))
        })
    }

    async fn record(&mut self, handle: &JobHandle) -> PipelineResult<()> {
        self.manifest.observe(handle);
        self.manifest.save(&self.workspace.manifest_path()).await
    }
}

/// Reconcile a raw result file outside any job context.
///
/// When a `job.json` manifest sits next to the raw results, the requested
/// chunking mode must match the recorded one.
pub async fn reconcile_offline(
    input: &Path,
    raw_results: &Path,
    id_field: &str,
    policy: ChunkingPolicy,
    rule: &DecisionRule,
    outputs: &ReconcileOutputs,
) -> PipelineResult<ReconcileReport> {
    let manifest_path = raw_results
        .parent()
        .map(|dir| dir.join("job.json"))
        .filter(|path| path.is_file());
    if let Some(path) = manifest_path {
        let manifest = JobManifest::load(&path).await?;
        manifest.ensure_policy(policy)?;
    }
    reconcile_files_blocking(
        input.to_path_buf(),
        raw_results.to_path_buf(),
        id_field.to_string(),
        policy,
        rule.clone(),
        outputs.clone(),
    )
    .await
}
