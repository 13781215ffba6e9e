use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, RequestBuilder as HttpRequest, Response};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::config::ProviderConfig;
use crate::services::context::{
    BatchJobClient, GenericRateLimiter, JobHandle, JobState, PipelineError, PipelineResult,
    UploadedFile,
};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const JSONL_MIME: &str = "application/jsonl";

/// Gemini Batch API client speaking plain REST.
#[derive(Clone)]
pub struct GeminiBatchClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
    limiter: Option<Arc<GenericRateLimiter>>,
}

impl GeminiBatchClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        limiter: Option<Arc<GenericRateLimiter>>,
    ) -> PipelineResult<Self> {
        let model = model.into();
        let model = model.strip_prefix("models/").unwrap_or(&model).to_string();
        if model.trim().is_empty() {
            return Err(PipelineError::message("generation model must not be empty"));
        }
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PipelineError::MissingGeminiApiKey);
        }
        Ok(Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            api_key,
            limiter,
        })
    }

    /// Build from provider settings and `GEMINI_API_KEY` / `GOOGLE_API_KEY`.
    pub fn from_env(provider: &ProviderConfig) -> PipelineResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| PipelineError::MissingGeminiApiKey)?;
        let limiter = provider.requests_per_minute.and_then(rate_limiter);
        Self::new(&provider.base_url, &provider.model, api_key, limiter)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        request.header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(&self, request: HttpRequest) -> PipelineResult<Response> {
        self.throttle().await;
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

pub fn rate_limiter(requests_per_minute: u32) -> Option<Arc<GenericRateLimiter>> {
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute)?);
    Some(Arc::new(RateLimiter::direct(quota)))
}

#[async_trait]
impl BatchJobClient for GeminiBatchClient {
    async fn upload_file(
        &self,
        display_name: &str,
        bytes: Vec<u8>,
    ) -> PipelineResult<UploadedFile> {
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", JSONL_MIME)
            .json(&json!({"file": {"displayName": display_name}}));
        let response = self.send(start).await?;
        let upload_url = upload_url(response.headers())?;

        let finalize = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .header(CONTENT_TYPE, JSONL_MIME)
            .body(bytes);
        let body: UploadResponse = self.send(finalize).await?.json().await?;
        tracing::info!(file = %body.file.name, "uploaded batch input");
        Ok(UploadedFile {
            name: body.file.name,
        })
    }

    async fn create_job(
        &self,
        display_name: &str,
        input: &UploadedFile,
    ) -> PipelineResult<JobHandle> {
        let request = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:batchGenerateContent",
                self.base_url, self.model
            ))
            .json(&json!({
                "batch": {
                    "displayName": sanitize_display_name(display_name),
                    "inputConfig": {"fileName": input.name},
                }
            }));
        let body: JsonValue = self.send(request).await?.json().await?;
        let handle = parse_batch(&body)?;
        tracing::info!(job = %handle.job_id, state = %handle.state, "batch job created");
        Ok(handle)
    }

    async fn job_status(&self, job_id: &str) -> PipelineResult<JobHandle> {
        if job_id.trim().is_empty() {
            return Err(PipelineError::message("provider job id must not be empty"));
        }
        let request = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, job_id.trim_start_matches('/')));
        let body: JsonValue = self.send(request).await?.json().await?;
        parse_batch(&body)
    }

    async fn download_file(&self, location: &str) -> PipelineResult<Vec<u8>> {
        let request = self
            .http
            .get(format!(
                "{}/download/v1beta/{}:download",
                self.base_url,
                location.trim_start_matches('/')
            ))
            .query(&[("alt", "media")]);
        let bytes = self.send(request).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFileBody,
}

#[derive(Debug, Deserialize)]
struct UploadedFileBody {
    name: String,
}

fn upload_url(headers: &HeaderMap) -> PipelineResult<String> {
    headers
        .get(UPLOAD_URL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::message("upload start response missing x-goog-upload-url"))
}

/// Read a batch resource, whether it is returned bare or wrapped in an
/// operation with `metadata`.
fn parse_batch(body: &JsonValue) -> PipelineResult<JobHandle> {
    let batch = body.get("metadata").unwrap_or(body);
    let job_id = body
        .get("name")
        .or_else(|| batch.get("name"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| PipelineError::message("Gemini batch response missing job name"))?
        .to_string();
    let state = batch
        .get("state")
        .and_then(JsonValue::as_str)
        .map(map_state)
        .unwrap_or(JobState::Pending);
    let result_location = [
        batch.pointer("/output/responsesFile"),
        body.pointer("/response/responsesFile"),
        batch.pointer("/dest/fileName"),
    ]
    .into_iter()
    .flatten()
    .find_map(JsonValue::as_str)
    .map(str::to_string);
    let error = body
        .pointer("/error/message")
        .or_else(|| batch.pointer("/error/message"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    Ok(JobHandle {
        job_id,
        state,
        result_location,
        error,
    })
}

/// Map a provider state string onto [`JobState`].
pub fn map_state(raw: &str) -> JobState {
    let name = raw
        .strip_prefix("BATCH_STATE_")
        .or_else(|| raw.strip_prefix("JOB_STATE_"))
        .unwrap_or(raw);
    match name {
        "RUNNING" | "UPDATING" | "PAUSED" => JobState::Running,
        "SUCCEEDED" => JobState::Succeeded,
        "FAILED" | "EXPIRED" | "PARTIALLY_SUCCEEDED" => JobState::Failed,
        "CANCELLED" | "CANCELLING" => JobState::Cancelled,
        _ => JobState::Pending,
    }
}

pub fn sanitize_display_name(name: &str) -> String {
    const MAX_LEN: usize = 40;
    let mut normalized: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if normalized.is_empty() {
        normalized = "job".to_string();
    }
    normalized.truncate(MAX_LEN);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_states_map_to_lifecycle_states() {
        assert_eq!(map_state("BATCH_STATE_PENDING"), JobState::Pending);
        assert_eq!(map_state("JOB_STATE_QUEUED"), JobState::Pending);
        assert_eq!(map_state("BATCH_STATE_RUNNING"), JobState::Running);
        assert_eq!(map_state("BATCH_STATE_SUCCEEDED"), JobState::Succeeded);
        assert_eq!(map_state("BATCH_STATE_EXPIRED"), JobState::Failed);
        assert_eq!(map_state("JOB_STATE_PARTIALLY_SUCCEEDED"), JobState::Failed);
        assert_eq!(map_state("BATCH_STATE_CANCELLED"), JobState::Cancelled);
        assert_eq!(map_state("SOMETHING_NEW"), JobState::Pending);
    }

    #[test]
    fn display_names_are_sanitized_and_capped() {
        assert_eq!(sanitize_display_name("validation batch/01"), "validation-batch-01");
        assert_eq!(sanitize_display_name(""), "job");
        assert_eq!(sanitize_display_name(&"x".repeat(80)).len(), 40);
    }

    #[test]
    fn operation_wrapped_batch_exposes_result_file() {
        let body = json!({
            "name": "batches/abc",
            "metadata": {
                "state": "BATCH_STATE_SUCCEEDED",
                "output": {"responsesFile": "files/out-1"}
            }
        });
        let handle = parse_batch(&body).expect("parse");
        assert_eq!(handle.job_id, "batches/abc");
        assert_eq!(handle.state, JobState::Succeeded);
        assert_eq!(handle.result_location.as_deref(), Some("files/out-1"));
    }

    #[test]
    fn failed_batch_carries_error_message() {
        let body = json!({
            "name": "batches/bad",
            "metadata": {"state": "BATCH_STATE_FAILED"},
            "error": {"code": 3, "message": "invalid request file"}
        });
        let handle = parse_batch(&body).expect("parse");
        assert_eq!(handle.state, JobState::Failed);
        assert_eq!(handle.error.as_deref(), Some("invalid request file"));
    }

    #[test]
    fn zero_rate_disables_limiter() {
        assert!(rate_limiter(0).is_none());
        assert!(rate_limiter(60).is_some());
    }
}
