//! Filesystem layout for job workspaces.
//!
//! Every job owns a private directory `<root>/<job_name>_<unix_ts>/`; parallel
//! jobs running in separate processes never share files. When two jobs with the
//! same name start within the same second, the later one gets a numeric
//! suffix (`<job_name>_<unix_ts>_1`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid job name `{name}`; expected non-empty name without path separators")]
    InvalidJobName { name: String },
    #[error("job workspace {path} does not exist")]
    MissingWorkspace { path: PathBuf },
    #[error("no free workspace name for `{base}` under {root}")]
    WorkspaceExhausted { root: PathBuf, base: String },
}

const MAX_WORKSPACE_SUFFIX: usize = 1000;

/// Private working directory of a single batch job.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    job_id: String,
    dir: PathBuf,
}

impl JobWorkspace {
    /// Create a fresh workspace under `root` with a timestamp-derived job id.
    pub fn create<P: AsRef<Path>>(root: P, job_name: &str) -> Result<Self, PathError> {
        let name = job_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(PathError::InvalidJobName {
                name: job_name.to_string(),
            });
        }
        let root = ensure_dir(root.as_ref())?;
        let base = format!("{name}_{}", Utc::now().timestamp());
        for attempt in 0..MAX_WORKSPACE_SUFFIX {
            let job_id = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let dir = root.join(&job_id);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(Self { job_id, dir }),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(PathError::CreateDir {
                        path: dir,
                        source: err,
                    });
                }
            }
        }
        Err(PathError::WorkspaceExhausted { root, base })
    }

    /// Open an existing workspace directory (e.g. to resume a job).
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, PathError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(PathError::MissingWorkspace { path: dir });
        }
        let job_id = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string());
        Ok(Self { job_id, dir })
    }

    /// Local job id (`<job_name>_<unix_ts>`), used as provider display name.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Submitted request artifact (`batch_requests.jsonl`).
    pub fn requests_path(&self) -> PathBuf {
        self.dir.join("batch_requests.jsonl")
    }

    /// Raw provider output, stored verbatim (`raw_results.jsonl`).
    pub fn raw_results_path(&self) -> PathBuf {
        self.dir.join("raw_results.jsonl")
    }

    pub fn accepted_path(&self) -> PathBuf {
        self.dir.join("accepted.jsonl")
    }

    pub fn rejected_path(&self) -> PathBuf {
        self.dir.join("rejected.jsonl")
    }

    pub fn missing_path(&self) -> PathBuf {
        self.dir.join("missing.jsonl")
    }

    pub fn generations_path(&self) -> PathBuf {
        self.dir.join("generations.jsonl")
    }

    /// Job manifest (`job.json`).
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("job.json")
    }
}

pub(crate) fn ensure_dir(path: &Path) -> Result<PathBuf, PathError> {
    if let Err(err) = fs::create_dir_all(path) {
        if err.kind() != io::ErrorKind::AlreadyExists {
            return Err(PathError::CreateDir {
                path: path.to_path_buf(),
                source: err,
            });
        }
    }
    Ok(path.to_path_buf())
}
