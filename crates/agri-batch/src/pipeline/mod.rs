//! Pure pipeline transformations over records and result artifacts.
//!
//! Modules under this namespace operate on readers and writers handed in by
//! the caller and never talk to the provider, so they can be reused by the
//! lifecycle orchestrator, offline reconciliation and tests alike.

mod prompts;
pub mod reconcile;
pub mod record;
pub mod request;
pub mod results;

pub use reconcile::{
    DecisionRule, JsonlSink, ReconcileReport, ReconciledRecord, RecordSink, ValidationStatus,
    merge, reconcile_record, verdict_matches,
};
pub use record::{DomainRecord, RecordLine, RecordReader};
pub use request::{
    BuildReport, ChunkingPolicy, GenerationConfig, GenerationSettings, RequestBuildError,
    RequestBuilder, RequestEntry,
};
pub use results::{DecisionMap, ParseReport, ResultEntry, ResultStatus, parse_results};
