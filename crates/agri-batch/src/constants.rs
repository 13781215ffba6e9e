//! Cross-cutting application constants.

/// Default Gemini model used for both generation and classification batches.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Public Gemini REST endpoint; overridden in tests and by `provider.base_url`.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Field read from each input record to obtain its identifier.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Records per request when submitting a classification batch.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Seconds between two job status queries.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Local job name prefix for advisory generation batches.
pub const DEFAULT_GENERATION_JOB_NAME: &str = "agri-advisory-job";

/// Local job name prefix for classification batches.
pub const DEFAULT_VALIDATION_JOB_NAME: &str = "validation_batch";

/// Attribute fields summarized for every record in a classification chunk.
pub const DEFAULT_SUMMARY_FIELDS: [&str; 4] = ["crop", "growth_stage", "weather", "stress"];

/// Tag written into `validation_status` for model-rejected records.
pub const STATUS_REJECTED_BY_MODEL: &str = "REJECTED_BY_MODEL";

/// Tag written into `validation_status` when no decision came back.
pub const STATUS_MISSING_DECISION: &str = "MISSING_DECISION";
