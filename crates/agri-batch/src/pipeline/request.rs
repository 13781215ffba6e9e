//! Conversion of domain records into batch request entries.
//!
//! Request entries serialize to the Gemini file-batch line format
//! (`{"key": ..., "request": {...}}`), one entry per line.

use std::collections::HashSet;
use std::io::{self, Write};
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::prompts::{
    CLASSIFICATION_SYSTEM_PROMPT, advisory_prompt, classification_prompt, summarize_record,
};
use crate::pipeline::record::{DomainRecord, RecordLine};

#[derive(Debug, Error)]
pub enum RequestBuildError {
    #[error("duplicate correlation id `{0}` within one batch")]
    DuplicateCorrelationId(String),
    #[error("invalid generation settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// How records are grouped into requests. One mode per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "size", rename_all = "snake_case")]
pub enum ChunkingPolicy {
    PerRecord,
    Chunked(NonZeroUsize),
}

impl ChunkingPolicy {
    pub fn is_chunked(&self) -> bool {
        matches!(self, ChunkingPolicy::Chunked(_))
    }
}

/// Generation parameters as configured; passed through to the provider.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationSettings {
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Reasoning budget hint in tokens.
    #[serde(default)]
    pub thinking_budget: Option<i32>,
    #[serde(default)]
    pub include_thoughts: bool,
    #[serde(default)]
    pub response_mime_type: Option<String>,
}

impl GenerationSettings {
    pub fn validate(&self) -> Result<(), RequestBuildError> {
        if let Some(temperature) = self.temperature
            && !temperature.is_finite()
        {
            return Err(RequestBuildError::InvalidSettings(
                "generation.temperature must be a finite number".to_string(),
            ));
        }
        if let Some(mime) = &self.response_mime_type
            && mime.trim().is_empty()
        {
            return Err(RequestBuildError::InvalidSettings(
                "generation.response_mime_type must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_generation_config(&self) -> GenerationConfig {
        let thinking_config = if self.thinking_budget.is_some() || self.include_thoughts {
            Some(ThinkingConfig {
                thinking_budget: self.thinking_budget,
                include_thoughts: self.include_thoughts.then_some(true),
            })
        } else {
            None
        };
        GenerationConfig {
            response_mime_type: self.response_mime_type.clone(),
            temperature: self.temperature,
            thinking_config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    fn user(text: String) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part { text }],
        }
    }

    fn system(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Prompt payload.
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

/// One line of the submitted batch artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    #[serde(rename = "key")]
    pub correlation_id: String,
    pub request: GenerateContentRequest,
}

/// Counters accumulated while building requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub records: usize,
    pub requests: usize,
    pub skipped_lines: usize,
}

pub struct RequestBuilder {
    policy: ChunkingPolicy,
    generation: GenerationConfig,
    summary_fields: Vec<String>,
}

impl RequestBuilder {
    pub fn new(
        policy: ChunkingPolicy,
        settings: &GenerationSettings,
    ) -> Result<Self, RequestBuildError> {
        settings.validate()?;
        Ok(Self {
            policy,
            generation: settings.to_generation_config(),
            summary_fields: Vec::new(),
        })
    }

    /// Attribute fields summarized per record in chunked prompts.
    #[must_use]
    pub fn with_summary_fields(mut self, fields: Vec<String>) -> Self {
        self.summary_fields = fields;
        self
    }

    pub fn policy(&self) -> ChunkingPolicy {
        self.policy
    }

    /// Lazily turn a record stream into request entries.
    pub fn entries<I>(&self, records: I) -> RequestEntries<'_, I>
    where
        I: Iterator<Item = io::Result<RecordLine>>,
    {
        RequestEntries {
            builder: self,
            records,
            report: BuildReport::default(),
            seen: HashSet::new(),
            chunk_index: 0,
            finished: false,
        }
    }

    /// Materialize every entry as one JSON line in `out`.
    pub fn write_artifact<I, W>(&self, records: I, mut out: W) -> Result<BuildReport, RequestBuildError>
    where
        I: Iterator<Item = io::Result<RecordLine>>,
        W: Write,
    {
        let mut entries = self.entries(records);
        for entry in entries.by_ref() {
            let entry = entry?;
            serde_json::to_writer(&mut out, &entry)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        let report = entries.report();
        tracing::info!(
            requests = report.requests,
            records = report.records,
            skipped = report.skipped_lines,
            "batch request artifact written"
        );
        Ok(report)
    }

    fn single_entry(&self, record: &DomainRecord) -> RequestEntry {
        RequestEntry {
            correlation_id: record.record_id.clone(),
            request: GenerateContentRequest {
                contents: vec![Content::user(advisory_prompt(record))],
                system_instruction: None,
                generation_config: self.generation.clone(),
            },
        }
    }

    fn chunk_entry(&self, chunk_index: usize, records: &[DomainRecord]) -> RequestEntry {
        let scenarios: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.record_id,
                    "text": summarize_record(record, &self.summary_fields),
                })
            })
            .collect();
        RequestEntry {
            correlation_id: format!("chunk_{chunk_index}"),
            request: GenerateContentRequest {
                contents: vec![Content::user(classification_prompt(&scenarios))],
                system_instruction: Some(Content::system(CLASSIFICATION_SYSTEM_PROMPT)),
                generation_config: self.generation.clone(),
            },
        }
    }
}

/// Iterator returned by [`RequestBuilder::entries`].
pub struct RequestEntries<'a, I> {
    builder: &'a RequestBuilder,
    records: I,
    report: BuildReport,
    seen: HashSet<String>,
    chunk_index: usize,
    finished: bool,
}

impl<I> RequestEntries<'_, I>
where
    I: Iterator<Item = io::Result<RecordLine>>,
{
    pub fn report(&self) -> BuildReport {
        self.report
    }

    /// Next well-formed record, counting malformed lines along the way.
    fn next_record(&mut self) -> Option<Result<DomainRecord, RequestBuildError>> {
        loop {
            match self.records.next()? {
                Err(err) => return Some(Err(err.into())),
                Ok(RecordLine::Malformed { .. }) => {
                    self.report.skipped_lines += 1;
                }
                Ok(RecordLine::Record(record)) => {
                    self.report.records += 1;
                    if !self.seen.insert(record.record_id.clone()) {
                        return Some(Err(RequestBuildError::DuplicateCorrelationId(
                            record.record_id,
                        )));
                    }
                    return Some(Ok(record));
                }
            }
        }
    }

    fn fail(&mut self, err: RequestBuildError) -> Option<Result<RequestEntry, RequestBuildError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<I> Iterator for RequestEntries<'_, I>
where
    I: Iterator<Item = io::Result<RecordLine>>,
{
    type Item = Result<RequestEntry, RequestBuildError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let entry = match self.builder.policy {
            ChunkingPolicy::PerRecord => match self.next_record()? {
                Ok(record) => self.builder.single_entry(&record),
                Err(err) => return self.fail(err),
            },
            ChunkingPolicy::Chunked(size) => {
                let mut chunk = Vec::with_capacity(size.get());
                while chunk.len() < size.get() {
                    match self.next_record() {
                        None => break,
                        Some(Ok(record)) => chunk.push(record),
                        Some(Err(err)) => return self.fail(err),
                    }
                }
                if chunk.is_empty() {
                    return None;
                }
                let entry = self.builder.chunk_entry(self.chunk_index, &chunk);
                self.chunk_index += 1;
                entry
            }
        };
        self.report.requests += 1;
        Some(Ok(entry))
    }
}
