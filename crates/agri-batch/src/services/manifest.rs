use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::pipeline::{ChunkingPolicy, DecisionRule};
use crate::services::context::{JobHandle, JobState, PipelineError, PipelineResult};

/// What the model is asked to do for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Advisory text per record; any output counts as acceptance.
    Generation,
    /// Accept/reject verdicts per record.
    Validation,
}

impl JobKind {
    pub fn decision_rule(&self, accept_value: &JsonValue) -> DecisionRule {
        match self {
            JobKind::Generation => DecisionRule::AnyOutput,
            JobKind::Validation => DecisionRule::Verdict {
                accept: accept_value.clone(),
            },
        }
    }
}

/// Metadata persisted as `job.json` in every job workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub local_job_id: String,
    pub kind: JobKind,
    pub policy: ChunkingPolicy,
    pub input_path: PathBuf,
    pub id_field: String,
    #[serde(default)]
    pub provider_job_id: Option<String>,
    #[serde(default)]
    pub uploaded_file: Option<String>,
    #[serde(default)]
    pub last_state: Option<JobState>,
    #[serde(default)]
    pub result_location: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl JobManifest {
    #[must_use]
    pub fn new(
        local_job_id: impl Into<String>,
        kind: JobKind,
        policy: ChunkingPolicy,
        input_path: impl Into<PathBuf>,
        id_field: impl Into<String>,
    ) -> Self {
        let local_job_id = local_job_id.into();
        debug_assert!(!local_job_id.is_empty());
        let now_ms = current_timestamp_ms();
        Self {
            local_job_id,
            kind,
            policy,
            input_path: input_path.into(),
            id_field: id_field.into(),
            provider_job_id: None,
            uploaded_file: None,
            last_state: None,
            result_location: None,
            error: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Record the latest provider view of the job.
    pub fn observe(&mut self, handle: &JobHandle) {
        self.provider_job_id = Some(handle.job_id.clone());
        self.last_state = Some(handle.state);
        if handle.result_location.is_some() {
            self.result_location = handle.result_location.clone();
        }
        self.error = handle.error.clone();
        self.updated_at_ms = current_timestamp_ms();
    }

    /// Refuse to interpret results with a chunking mode other than the one
    /// the requests were built with.
    pub fn ensure_policy(&self, requested: ChunkingPolicy) -> PipelineResult<()> {
        if self.policy.is_chunked() != requested.is_chunked() {
            return Err(PipelineError::ModeMismatch {
                recorded: self.policy,
                requested,
            });
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> PipelineResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, path: &Path) -> PipelineResult<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

pub(crate) fn current_timestamp_ms() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    since_epoch.as_millis() as i64
}
