//! Merge phase: assign exactly one outcome to every original record.
//!
//! The merge is driven by the original record stream, never by the results,
//! so records whose responses were dropped or truncated still get an outcome.
//! Anything without a confirmed positive decision is rejected.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use crate::constants::{STATUS_MISSING_DECISION, STATUS_REJECTED_BY_MODEL};
use crate::pipeline::record::{DomainRecord, RecordLine};
use crate::pipeline::results::{DecisionMap, ParseReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Accepted,
    RejectedByModel,
    MissingDecision,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Accepted => "ACCEPTED",
            ValidationStatus::RejectedByModel => STATUS_REJECTED_BY_MODEL,
            ValidationStatus::MissingDecision => STATUS_MISSING_DECISION,
        }
    }
}

/// How a present decision payload is judged.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionRule {
    /// Accept only when the verdict equals this value.
    Verdict { accept: JsonValue },
    /// Any payload counts as acceptance (generation jobs).
    AnyOutput,
}

impl DecisionRule {
    pub fn accepts(&self, decision: &JsonValue) -> bool {
        match self {
            DecisionRule::Verdict { accept } => verdict_matches(decision, accept),
            DecisionRule::AnyOutput => !decision.is_null(),
        }
    }
}

/// Loose verdict equality: numbers compare by value and booleans count as 0/1.
pub fn verdict_matches(decision: &JsonValue, expected: &JsonValue) -> bool {
    match (as_number(decision), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => decision == expected,
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// A record together with its outcome.
#[derive(Debug, Clone)]
pub struct ReconciledRecord<'a> {
    pub record: &'a DomainRecord,
    pub status: ValidationStatus,
    pub decision: Option<&'a JsonValue>,
}

pub fn reconcile_record<'a>(
    record: &'a DomainRecord,
    decisions: &'a DecisionMap,
    rule: &DecisionRule,
) -> ReconciledRecord<'a> {
    let decision = decisions.get(&record.record_id);
    let status = match decision {
        None => ValidationStatus::MissingDecision,
        Some(value) if rule.accepts(value) => ValidationStatus::Accepted,
        Some(_) => ValidationStatus::RejectedByModel,
    };
    ReconciledRecord {
        record,
        status,
        decision,
    }
}

/// Destination of reconciled records.
pub trait RecordSink {
    fn write(&mut self, reconciled: &ReconciledRecord<'_>) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// Writes outcomes as newline-delimited JSON.
///
/// Accepted records are copied verbatim; rejected ones gain a
/// `validation_status` field. Missing decisions go to `missing` when set,
/// otherwise to `rejected`. `generations`, when set, receives
/// `{record_id, output}` for each accepted record.
pub struct JsonlSink<W: Write> {
    pub accepted: W,
    pub rejected: W,
    pub missing: Option<W>,
    pub generations: Option<W>,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(accepted: W, rejected: W) -> Self {
        Self {
            accepted,
            rejected,
            missing: None,
            generations: None,
        }
    }

    #[must_use]
    pub fn with_missing(mut self, missing: W) -> Self {
        self.missing = Some(missing);
        self
    }

    #[must_use]
    pub fn with_generations(mut self, generations: W) -> Self {
        self.generations = Some(generations);
        self
    }
}

fn write_json_line<W: Write>(out: &mut W, value: &JsonValue) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn write(&mut self, reconciled: &ReconciledRecord<'_>) -> io::Result<()> {
        let record = reconciled.record;
        match reconciled.status {
            ValidationStatus::Accepted => {
                self.accepted.write_all(record.raw().as_bytes())?;
                self.accepted.write_all(b"\n")?;
                if let (Some(out), Some(decision)) = (self.generations.as_mut(), reconciled.decision)
                {
                    write_json_line(
                        out,
                        &json!({"record_id": record.record_id, "output": decision}),
                    )?;
                }
            }
            ValidationStatus::RejectedByModel => {
                write_json_line(&mut self.rejected, &record.tagged(reconciled.status.as_str()))?;
            }
            ValidationStatus::MissingDecision => {
                let out = self.missing.as_mut().unwrap_or(&mut self.rejected);
                write_json_line(out, &record.tagged(reconciled.status.as_str()))?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.accepted.flush()?;
        self.rejected.flush()?;
        if let Some(missing) = self.missing.as_mut() {
            missing.flush()?;
        }
        if let Some(generations) = self.generations.as_mut() {
            generations.flush()?;
        }
        Ok(())
    }
}

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub accepted: usize,
    pub rejected: usize,
    pub missing: usize,
    pub skipped_lines: usize,
    pub parse: ParseReport,
}

impl ReconcileReport {
    /// Number of well-formed input records that received an outcome.
    pub fn total(&self) -> usize {
        self.accepted + self.rejected + self.missing
    }
}

/// Merge decisions against the original record stream.
pub fn merge<I, S>(
    records: I,
    decisions: &DecisionMap,
    rule: &DecisionRule,
    sink: &mut S,
) -> io::Result<ReconcileReport>
where
    I: Iterator<Item = io::Result<RecordLine>>,
    S: RecordSink + ?Sized,
{
    let mut report = ReconcileReport::default();
    for line in records {
        let record = match line? {
            RecordLine::Record(record) => record,
            RecordLine::Malformed { .. } => {
                report.skipped_lines += 1;
                continue;
            }
        };
        let reconciled = reconcile_record(&record, decisions, rule);
        match reconciled.status {
            ValidationStatus::Accepted => report.accepted += 1,
            ValidationStatus::RejectedByModel => report.rejected += 1,
            ValidationStatus::MissingDecision => {
                tracing::debug!(record_id = %record.record_id, "no decision returned; rejecting");
                report.missing += 1;
            }
        }
        sink.write(&reconciled)?;
    }
    sink.flush()?;
    tracing::info!(
        accepted = report.accepted,
        rejected = report.rejected,
        missing = report.missing,
        skipped = report.skipped_lines,
        "reconciliation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::RecordReader;
    use std::io::Cursor;

    fn records(input: &str) -> RecordReader<Cursor<String>> {
        RecordReader::new(Cursor::new(input.to_string()), "id")
    }

    fn lines(buffer: &[u8]) -> Vec<JsonValue> {
        String::from_utf8_lossy(buffer)
            .lines()
            .map(|line| serde_json::from_str(line).expect("output line is json"))
            .collect()
    }

    fn verdict_rule() -> DecisionRule {
        DecisionRule::Verdict { accept: json!(1) }
    }

    #[test]
    fn three_record_scenario_partitions_with_safety_default() {
        let input = "{\"id\":\"1\"}\n{\"id\":\"2\"}\n{\"id\":\"3\"}\n";
        let decisions: DecisionMap = [
            ("1".to_string(), json!(1)),
            ("3".to_string(), json!(0)),
        ]
        .into_iter()
        .collect();
        let mut sink = JsonlSink::new(Vec::new(), Vec::new());

        let report = merge(records(input), &decisions, &verdict_rule(), &mut sink).expect("merge");

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.missing, 1);
        assert_eq!(String::from_utf8_lossy(&sink.accepted), "{\"id\":\"1\"}\n");
        let rejected = lines(&sink.rejected);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0]["id"], "2");
        assert_eq!(rejected[0]["validation_status"], "MISSING_DECISION");
        assert_eq!(rejected[1]["id"], "3");
        assert_eq!(rejected[1]["validation_status"], "REJECTED_BY_MODEL");
    }

    #[test]
    fn accepted_records_are_written_verbatim() {
        let input = "{\"id\": \"a\",   \"crop\": {\"label\": \"Rice\"}}\n";
        let decisions: DecisionMap = [("a".to_string(), json!(1))].into_iter().collect();
        let mut sink = JsonlSink::new(Vec::new(), Vec::new());
        merge(records(input), &decisions, &verdict_rule(), &mut sink).expect("merge");
        assert_eq!(String::from_utf8_lossy(&sink.accepted), input);
    }

    #[test]
    fn missing_bucket_can_be_split_out() {
        let input = "{\"id\":\"1\"}\n{\"id\":\"2\"}\n";
        let decisions: DecisionMap = [("1".to_string(), json!(0))].into_iter().collect();
        let mut sink = JsonlSink::new(Vec::new(), Vec::new()).with_missing(Vec::new());
        let report = merge(records(input), &decisions, &verdict_rule(), &mut sink).expect("merge");

        assert_eq!(report.total(), 2);
        assert_eq!(lines(&sink.rejected).len(), 1);
        let missing = lines(sink.missing.as_deref().unwrap_or_default());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0]["id"], "2");
    }

    #[test]
    fn verdicts_compare_loosely_but_safely() {
        assert!(verdict_matches(&json!(1), &json!(1)));
        assert!(verdict_matches(&json!(1.0), &json!(1)));
        assert!(verdict_matches(&json!(true), &json!(1)));
        assert!(!verdict_matches(&json!("1"), &json!(1)));
        assert!(!verdict_matches(&json!(0), &json!(1)));
        assert!(!verdict_matches(&json!(null), &json!(1)));
    }

    #[test]
    fn generation_rule_emits_outputs_for_accepted_records() {
        let input = "{\"bundle_id\":\"b1\"}\n{\"bundle_id\":\"b2\"}\n";
        let reader = RecordReader::new(Cursor::new(input.to_string()), "bundle_id");
        let decisions: DecisionMap = [("b1".to_string(), json!({"advisory_hindi": "text"}))]
            .into_iter()
            .collect();
        let mut sink = JsonlSink::new(Vec::new(), Vec::new()).with_generations(Vec::new());
        let report = merge(reader, &decisions, &DecisionRule::AnyOutput, &mut sink).expect("merge");

        assert_eq!(report.accepted, 1);
        assert_eq!(report.missing, 1);
        let generations = lines(sink.generations.as_deref().unwrap_or_default());
        assert_eq!(generations[0]["record_id"], "b1");
        assert_eq!(generations[0]["output"]["advisory_hindi"], "text");
    }

    #[test]
    fn malformed_input_lines_are_counted() {
        let input = "{\"id\":\"1\"}\nnot-json\n";
        let decisions = DecisionMap::default();
        let mut sink = JsonlSink::new(Vec::new(), Vec::new());
        let report = merge(records(input), &decisions, &verdict_rule(), &mut sink).expect("merge");
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.missing, 1);
    }
}
