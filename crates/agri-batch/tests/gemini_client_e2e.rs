//! Gemini Batch REST surface against a local mock server.
//!
//! Covers the resumable upload handshake, batch creation, status mapping and
//! result download, then drives a full chunked validation run through the
//! real client.

use std::fs;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

use agri_batch::pipeline::{ChunkingPolicy, GenerationSettings};
use agri_batch::services::{
    BatchJobClient, BatchJobContext, GeminiBatchClient, JobKind, JobState, JobSubmitter,
    LifecycleSettings, PipelineError,
};

const API_KEY: &str = "test-key";
const MODEL: &str = "gemini-2.5-flash";

fn gemini_client(server: &MockServer) -> GeminiBatchClient {
    GeminiBatchClient::new(server.uri(), format!("models/{MODEL}"), API_KEY, None)
        .expect("client")
}

async fn mount_upload(server: &MockServer) {
    let session_url = format!("{}/upload-session/abc", server.uri());
    Mock::given(method("POST"))
        .and(path("/upload/v1beta/files"))
        .and(header("x-goog-api-key", API_KEY))
        .and(header("X-Goog-Upload-Protocol", "resumable"))
        .and(header("X-Goog-Upload-Command", "start"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-goog-upload-url", session_url.as_str())
                .set_body_json(json!({})),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload-session/abc"))
        .and(header("X-Goog-Upload-Offset", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"file": {"name": "files/input-1", "mimeType": "application/jsonl"}})),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_create(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:batchGenerateContent")))
        .and(header("x-goog-api-key", API_KEY))
        .and(body_partial_json(json!({"batch": {"inputConfig": {"fileName": "files/input-1"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "batches/123",
            "metadata": {"state": "BATCH_STATE_PENDING"}
        })))
        .mount(server)
        .await;
}

fn status_body(state: &str) -> serde_json::Value {
    let mut metadata = json!({"state": state});
    if state == "BATCH_STATE_SUCCEEDED" {
        metadata["output"] = json!({"responsesFile": "files/out-1"});
    }
    json!({"name": "batches/123", "metadata": metadata})
}

#[tokio::test]
async fn upload_and_create_return_job_handle() {
    let server = MockServer::start().await;
    mount_upload(&server).await;
    mount_create(&server).await;

    let temp = TempDir::new().expect("temp dir");
    let artifact = temp.path().join("batch_requests.jsonl");
    fs::write(&artifact, "{\"key\":\"chunk_0\",\"request\":{}}\n").expect("artifact");

    let client = gemini_client(&server);
    let handle = JobSubmitter::new(&client)
        .submit(&artifact, "validation_batch_1700000000")
        .await
        .expect("submit");

    assert_eq!(handle.job_id, "batches/123");
    assert_eq!(handle.state, JobState::Pending);
}

#[tokio::test]
async fn create_failure_after_upload_is_orphaned() {
    let server = MockServer::start().await;
    mount_upload(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:batchGenerateContent")))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input file"))
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let artifact = temp.path().join("batch_requests.jsonl");
    fs::write(&artifact, "{\"key\":\"1\",\"request\":{}}\n").expect("artifact");

    let client = gemini_client(&server);
    let err = JobSubmitter::new(&client)
        .submit(&artifact, "agri-advisory-job")
        .await
        .expect_err("creation fails");
    match err {
        PipelineError::OrphanedUpload { file, source } => {
            assert_eq!(file, "files/input-1");
            match *source {
                PipelineError::Provider { status, body } => {
                    assert_eq!(status, 400);
                    assert_eq!(body, "bad input file");
                }
                other => panic!("unexpected source: {other}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn status_and_download_follow_batch_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/batches/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("BATCH_STATE_SUCCEEDED")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/v1beta/files/out-1:download"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"key\":\"1\"}\n"))
        .mount(&server)
        .await;

    let client = gemini_client(&server);
    let handle = client.job_status("batches/123").await.expect("status");
    assert_eq!(handle.state, JobState::Succeeded);
    assert_eq!(handle.result_location.as_deref(), Some("files/out-1"));

    let bytes = client
        .download_file("files/out-1")
        .await
        .expect("download");
    assert_eq!(bytes, b"{\"key\":\"1\"}\n");
}

#[tokio::test]
async fn http_errors_surface_as_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/batches/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let client = gemini_client(&server);
    let err = client
        .job_status("batches/missing")
        .await
        .expect_err("missing job");
    assert!(matches!(err, PipelineError::Provider { status: 404, .. }));
}

#[test]
fn empty_api_key_is_rejected() {
    let result = GeminiBatchClient::new("http://localhost", MODEL, "", None);
    assert!(matches!(result, Err(PipelineError::MissingGeminiApiKey)));
}

#[tokio::test]
async fn chunked_validation_runs_against_mock_provider() {
    let server = MockServer::start().await;
    mount_upload(&server).await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1beta/batches/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("BATCH_STATE_RUNNING")))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/batches/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("BATCH_STATE_SUCCEEDED")))
        .with_priority(2)
        .mount(&server)
        .await;
    let raw = json!({
        "key": "chunk_0",
        "response": {"candidates": [{"content": {"parts": [
            {"text": "weighing soil moisture", "thought": true},
            {"text": "{\"1\": 1, \"3\": 0}"}
        ]}}]}
    })
    .to_string();
    Mock::given(method("GET"))
        .and(path("/download/v1beta/files/out-1:download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(raw + "\n"))
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let input = temp.path().join("scenarios.jsonl");
    fs::write(&input, "{\"id\":\"1\"}\n{\"id\":\"2\"}\n{\"id\":\"3\"}\n").expect("input");

    let settings = LifecycleSettings {
        generation: GenerationSettings::default(),
        id_field: "id".to_string(),
        summary_fields: Vec::new(),
        poll_interval: Duration::from_millis(10),
        poll_timeout: Some(Duration::from_secs(10)),
        accept_value: json!(1),
        split_missing: false,
    };
    let client: Arc<dyn BatchJobClient> = Arc::new(gemini_client(&server));
    let mut ctx = BatchJobContext::create(
        client,
        settings,
        temp.path(),
        "validation_batch",
        JobKind::Validation,
        ChunkingPolicy::Chunked(NonZeroUsize::new(50).expect("non-zero")),
        &input,
    )
    .await
    .expect("context");

    let summary = ctx.run().await.expect("run");
    assert_eq!(summary.build.requests, 1);
    assert_eq!(summary.handle.state, JobState::Succeeded);
    assert_eq!(summary.reconcile.accepted, 1);
    assert_eq!(summary.reconcile.rejected, 1);
    assert_eq!(summary.reconcile.missing, 1);

    let accepted = fs::read_to_string(ctx.workspace().accepted_path()).expect("accepted");
    assert_eq!(accepted, "{\"id\":\"1\"}\n");
}
