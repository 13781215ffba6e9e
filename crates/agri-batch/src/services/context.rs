use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::RateLimiter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::PathError;
use crate::pipeline::{ChunkingPolicy, RequestBuildError};

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Provider job state as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Client-side view of a provider batch job.
///
/// State only changes by re-querying the provider; the client never deletes
/// the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub state: JobState,
    #[serde(default)]
    pub result_location: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobHandle {
    /// Rebuild a handle from a bare provider job id by querying real state.
    pub async fn resume(client: &dyn BatchJobClient, job_id: &str) -> PipelineResult<Self> {
        if job_id.trim().is_empty() {
            return Err(PipelineError::message("provider job id must not be empty"));
        }
        client.job_status(job_id).await
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// File stored on the provider side, referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
}

/// Remote operations needed to run one batch job.
#[async_trait]
pub trait BatchJobClient: Send + Sync {
    async fn upload_file(&self, display_name: &str, bytes: Vec<u8>)
    -> PipelineResult<UploadedFile>;

    async fn create_job(
        &self,
        display_name: &str,
        input: &UploadedFile,
    ) -> PipelineResult<JobHandle>;

    async fn job_status(&self, job_id: &str) -> PipelineResult<JobHandle>;

    async fn download_file(&self, location: &str) -> PipelineResult<Vec<u8>>;
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Message(String),
    #[error("missing GEMINI_API_KEY or GOOGLE_API_KEY environment variable")]
    MissingGeminiApiKey,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Build(#[from] RequestBuildError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
    #[error("uploaded file `{file}` left orphaned after job creation failed: {source}")]
    OrphanedUpload {
        file: String,
        #[source]
        source: Box<PipelineError>,
    },
    #[error("batch job `{job_id}` did not succeed (state {state}){}", reason_suffix(.message))]
    JobDidNotSucceed {
        job_id: String,
        state: JobState,
        message: Option<String>,
    },
    #[error("batch job `{job_id}` is not finished (state {state})")]
    JobNotReady { job_id: String, state: JobState },
    #[error("batch job `{job_id}` succeeded without a result location")]
    MissingResultLocation { job_id: String },
    #[error("gave up waiting for batch job `{job_id}` after {waited:?}")]
    PollTimeout { job_id: String, waited: Duration },
    #[error("waiting for batch job `{job_id}` was cancelled")]
    Cancelled { job_id: String },
    #[error("workspace belongs to batch job `{recorded}`, not `{requested}`")]
    JobIdMismatch { recorded: String, requested: String },
    #[error("requests were built with {recorded:?} but reconciliation asked for {requested:?}")]
    ModeMismatch {
        recorded: ChunkingPolicy,
        requested: ChunkingPolicy,
    },
}

impl PipelineError {
    pub fn message(msg: impl Into<String>) -> Self {
        PipelineError::Message(msg.into())
    }
}

fn reason_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}
