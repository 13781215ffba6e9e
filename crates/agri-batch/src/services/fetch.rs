use std::path::{Path, PathBuf};

use crate::services::context::{
    BatchJobClient, JobHandle, JobState, PipelineError, PipelineResult,
};

/// Raw result artifact stored on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResults {
    pub path: PathBuf,
    pub bytes: usize,
}

/// Downloads the result artifact of a finished job.
pub struct ResultFetcher<'a> {
    client: &'a dyn BatchJobClient,
}

impl<'a> ResultFetcher<'a> {
    pub fn new(client: &'a dyn BatchJobClient) -> Self {
        Self { client }
    }

    /// Write the provider output verbatim to `dest` before anything parses it.
    ///
    /// Uses the location carried by the terminal handle; the job is not
    /// queried again.
    pub async fn fetch(&self, handle: &JobHandle, dest: &Path) -> PipelineResult<FetchedResults> {
        if handle.state != JobState::Succeeded {
            return Err(PipelineError::JobNotReady {
                job_id: handle.job_id.clone(),
                state: handle.state,
            });
        }
        let Some(location) = handle.result_location.as_deref() else {
            return Err(PipelineError::MissingResultLocation {
                job_id: handle.job_id.clone(),
            });
        };

        let bytes = self.client.download_file(location).await?;
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        tracing::info!(
            job_id = %handle.job_id,
            location = %location,
            bytes = bytes.len(),
            path = %dest.display(),
            "raw batch results saved"
        );
        Ok(FetchedResults {
            path: dest.to_path_buf(),
            bytes: bytes.len(),
        })
    }
}
