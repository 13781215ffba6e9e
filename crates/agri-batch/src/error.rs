//! Application-level error type shared by the binary and its commands.

use std::path::PathBuf;

use thiserror::Error;

use crate::config;
use crate::paths::PathError;
use crate::services::PipelineError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error("workspace {path} has no job manifest; pass --workspace for a job created by batch-run")]
    MissingManifest { path: PathBuf },
}
