//! Orchestration layer for IO-bound batch job services.
//!
//! Modules here talk to the provider and the filesystem. Pure transforms over
//! records and result artifacts live in `crate::pipeline`.

pub mod context;
pub mod fetch;
pub mod gemini;
pub mod lifecycle;
pub mod manifest;
pub mod poller;
pub mod submit;

pub use context::{
    BatchJobClient, GenericRateLimiter, JobHandle, JobState, PipelineError, PipelineResult,
    UploadedFile,
};
pub use fetch::{FetchedResults, ResultFetcher};
pub use gemini::{GeminiBatchClient, map_state, rate_limiter, sanitize_display_name};
pub use lifecycle::{
    BatchJobContext, LifecycleSettings, ReconcileOutputs, RunSummary, build_request_file,
    reconcile_files, reconcile_offline,
};
pub use manifest::{JobKind, JobManifest};
pub use poller::JobPoller;
pub use submit::JobSubmitter;
