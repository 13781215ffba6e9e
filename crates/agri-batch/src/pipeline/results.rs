//! Parse phase: raw provider results into a correlation-id → decision map.
//!
//! Every line of the raw artifact is independent. Lines that are not JSON or
//! lack the expected response fields are logged, counted and skipped; they
//! never change the outcome of other lines.

use std::collections::HashMap;
use std::io::{self, BufRead};

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::pipeline::record::{normalize_id, read_raw_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// One parsed line of the raw result artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    /// `None` when the provider line carried no key.
    pub correlation_id: Option<String>,
    /// Model text for `Ok`, error description for `Error`.
    pub raw_output: String,
    pub status: ResultStatus,
}

/// Flat mapping of record id to decision payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionMap {
    decisions: HashMap<String, JsonValue>,
}

impl DecisionMap {
    pub fn get(&self, record_id: &str) -> Option<&JsonValue> {
        self.decisions.get(record_id)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Insert a decision; returns `true` when it replaced an earlier one.
    pub fn insert(&mut self, record_id: String, decision: JsonValue) -> bool {
        self.decisions.insert(record_id, decision).is_some()
    }
}

impl FromIterator<(String, JsonValue)> for DecisionMap {
    fn from_iter<T: IntoIterator<Item = (String, JsonValue)>>(iter: T) -> Self {
        Self {
            decisions: iter.into_iter().collect(),
        }
    }
}

/// Counters for the parse phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub lines: usize,
    pub ok_entries: usize,
    pub error_entries: usize,
    pub malformed_lines: usize,
    pub duplicate_decisions: usize,
    pub decisions: usize,
}

/// Parse one raw result line. `None` means the line is malformed.
pub fn parse_result_line(line: &str) -> Option<ResultEntry> {
    let value: JsonValue = serde_json::from_str(line.trim()).ok()?;
    let object = value.as_object()?;
    let correlation_id = object
        .get("key")
        .or_else(|| object.get("custom_id"))
        .and_then(normalize_id);

    if let Some(response) = object.get("response") {
        let text = response_text(response)?;
        return Some(ResultEntry {
            correlation_id,
            raw_output: text,
            status: ResultStatus::Ok,
        });
    }
    if let Some(error) = object.get("error") {
        let message = error
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(ResultEntry {
            correlation_id,
            raw_output: message,
            status: ResultStatus::Error,
        });
    }
    None
}

/// Join the non-thought text parts of the first candidate.
fn response_text(response: &JsonValue) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut buffer = String::new();
    for part in parts {
        if part.get("thought").and_then(JsonValue::as_bool) == Some(true) {
            continue;
        }
        if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
            buffer.push_str(text);
        }
    }
    if buffer.trim().is_empty() {
        return None;
    }
    Some(buffer)
}

/// Strip a surrounding Markdown code fence, if any.
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the raw artifact into decisions.
///
/// With `chunked` set, each model output must be a JSON object of record id to
/// verdict and is flattened into the map. Otherwise the output (parsed as JSON
/// when possible) is keyed by the line's correlation id. Lines that are not
/// valid UTF-8 count as malformed. Only I/O errors are returned as `Err`.
pub fn parse_results<R: BufRead>(
    mut reader: R,
    chunked: bool,
) -> io::Result<(DecisionMap, ParseReport)> {
    let mut decisions = DecisionMap::default();
    let mut report = ParseReport::default();

    let mut buf = Vec::new();
    let mut next_line = 0usize;
    while read_raw_line(&mut reader, &mut buf)? {
        let line_no = next_line;
        next_line += 1;
        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!(line = line_no, "skipping result line with invalid UTF-8");
            report.lines += 1;
            report.malformed_lines += 1;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        report.lines += 1;

        let Some(entry) = parse_result_line(line) else {
            tracing::warn!(line = line_no, "skipping unparseable result line");
            report.malformed_lines += 1;
            continue;
        };

        if entry.status == ResultStatus::Error {
            tracing::warn!(
                line = line_no,
                key = entry.correlation_id.as_deref().unwrap_or("unknown"),
                error = %entry.raw_output,
                "provider reported a failed request"
            );
            report.error_entries += 1;
            continue;
        }

        let body = unfence(&entry.raw_output);
        if chunked {
            let Ok(JsonValue::Object(verdicts)) = serde_json::from_str::<JsonValue>(body) else {
                tracing::warn!(line = line_no, "chunk output is not a JSON object; skipping");
                report.malformed_lines += 1;
                continue;
            };
            report.ok_entries += 1;
            for (record_id, verdict) in verdicts {
                if decisions.insert(record_id, verdict) {
                    report.duplicate_decisions += 1;
                }
            }
        } else {
            let Some(correlation_id) = entry.correlation_id else {
                tracing::warn!(line = line_no, "result line has no key; skipping");
                report.malformed_lines += 1;
                continue;
            };
            report.ok_entries += 1;
            let payload = serde_json::from_str::<JsonValue>(body)
                .unwrap_or_else(|_| JsonValue::String(body.to_string()));
            if decisions.insert(correlation_id, payload) {
                report.duplicate_decisions += 1;
            }
        }
    }

    report.decisions = decisions.len();
    tracing::info!(
        lines = report.lines,
        decisions = report.decisions,
        malformed = report.malformed_lines,
        errors = report.error_entries,
        "parsed raw batch results"
    );
    Ok((decisions, report))
}
