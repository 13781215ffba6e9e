use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::cli::validators::{
    validate_chunk_size, validate_input_file, validate_job_name, validate_poll_interval,
};
use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_GENERATION_JOB_NAME, DEFAULT_VALIDATION_JOB_NAME,
};
use crate::pipeline::ChunkingPolicy;
use crate::services::JobKind;

/// Request grouping selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// One request per record.
    PerRecord,
    /// Many records per request.
    Chunked,
}

impl ModeArg {
    pub fn policy(self, chunk_size: NonZeroUsize) -> ChunkingPolicy {
        match self {
            ModeArg::PerRecord => ChunkingPolicy::PerRecord,
            ModeArg::Chunked => ChunkingPolicy::Chunked(chunk_size),
        }
    }

    /// Job kind implied by the mode when none is given explicitly.
    pub fn default_kind(self) -> JobKind {
        match self {
            ModeArg::PerRecord => JobKind::Generation,
            ModeArg::Chunked => JobKind::Validation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Generation,
    Validation,
}

impl From<KindArg> for JobKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Generation => JobKind::Generation,
            KindArg::Validation => JobKind::Validation,
        }
    }
}

/// Polling overrides shared by commands that wait for a job.
#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    /// Seconds between status queries (1..=3600); defaults to configuration.
    #[arg(long, value_parser = validate_poll_interval)]
    pub poll_interval: Option<u64>,
    /// Give up waiting after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Submit per-record advisory generation requests and exit.
#[derive(Debug, Args)]
pub struct BatchRunArgs {
    /// NDJSON file of scenario records.
    #[arg(long, value_name = "FILE", value_parser = validate_input_file)]
    pub input: PathBuf,
    /// Prefix of the local job id.
    #[arg(long, default_value = DEFAULT_GENERATION_JOB_NAME, value_parser = validate_job_name)]
    pub job_name: String,
    /// Root directory for job workspaces; defaults to `output.root`.
    #[arg(long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,
}

/// Resume a submitted job, wait for it and fetch its results.
#[derive(Debug, Args)]
pub struct CheckBatchArgs {
    /// Provider job id, e.g. `batches/abc123`.
    #[arg(long)]
    pub job_id: String,
    /// Workspace created by `batch-run`; enables reconciliation.
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,
    /// Root directory for a fresh workspace when `--workspace` is omitted.
    #[arg(long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,
    #[command(flatten)]
    pub poll: PollArgs,
}

/// Run a chunked classification batch end to end.
#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// NDJSON file of scenario records.
    #[arg(long, value_name = "FILE", value_parser = validate_input_file)]
    pub input: PathBuf,
    /// Records per request (1..=500).
    #[arg(long, default_value_t = NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN), value_parser = validate_chunk_size)]
    pub chunk_size: NonZeroUsize,
    /// Prefix of the local job id.
    #[arg(long, default_value = DEFAULT_VALIDATION_JOB_NAME, value_parser = validate_job_name)]
    pub job_name: String,
    /// Root directory for job workspaces; defaults to `output.root`.
    #[arg(long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,
    #[command(flatten)]
    pub poll: PollArgs,
}

/// Reconcile an existing raw result file against its input records.
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Original NDJSON records.
    #[arg(long, value_name = "FILE", value_parser = validate_input_file)]
    pub input: PathBuf,
    /// Raw provider results.
    #[arg(long, value_name = "FILE", value_parser = validate_input_file)]
    pub results: PathBuf,
    /// Chunking mode the requests were built with.
    #[arg(long, value_enum)]
    pub mode: ModeArg,
    /// How decisions are judged; defaults from the mode.
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
    /// Directory for accepted/rejected outputs.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,
}

/// Write the request artifact without contacting the provider.
#[derive(Debug, Args)]
pub struct BuildRequestsArgs {
    /// NDJSON file of scenario records.
    #[arg(long, value_name = "FILE", value_parser = validate_input_file)]
    pub input: PathBuf,
    #[arg(long, value_enum, default_value_t = ModeArg::Chunked)]
    pub mode: ModeArg,
    /// Records per request in chunked mode (1..=500).
    #[arg(long, default_value_t = NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN), value_parser = validate_chunk_size)]
    pub chunk_size: NonZeroUsize,
    /// Destination of the NDJSON request artifact.
    #[arg(long, value_name = "FILE")]
    pub out: PathBuf,
}
