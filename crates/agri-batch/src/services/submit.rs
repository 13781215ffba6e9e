use std::path::Path;

use crate::services::context::{BatchJobClient, JobHandle, PipelineError, PipelineResult};

/// Uploads a request artifact and creates the batch job from it.
///
/// Two remote calls, no retries. When the upload succeeds but job creation
/// fails, the uploaded file is left on the provider and reported through
/// [`PipelineError::OrphanedUpload`].
pub struct JobSubmitter<'a> {
    client: &'a dyn BatchJobClient,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(client: &'a dyn BatchJobClient) -> Self {
        Self { client }
    }

    pub async fn submit(&self, artifact: &Path, display_name: &str) -> PipelineResult<JobHandle> {
        let bytes = tokio::fs::read(artifact).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(PipelineError::message(format!(
                "request artifact {} is empty",
                artifact.display()
            )));
        }
        tracing::info!(
            artifact = %artifact.display(),
            bytes = bytes.len(),
            "uploading batch requests"
        );
        let uploaded = self.client.upload_file(display_name, bytes).await?;

        match self.client.create_job(display_name, &uploaded).await {
            Ok(handle) => {
                tracing::info!(job_id = %handle.job_id, state = %handle.state, "batch job submitted");
                Ok(handle)
            }
            Err(err) => {
                tracing::warn!(
                    file = %uploaded.name,
                    error = %err,
                    "job creation failed; uploaded file left on provider"
                );
                Err(PipelineError::OrphanedUpload {
                    file: uploaded.name,
                    source: Box::new(err),
                })
            }
        }
    }
}
