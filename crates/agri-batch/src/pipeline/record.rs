//! Domain records read from newline-delimited JSON input.
//!
//! Both the request builder and the reconciler's merge phase read records
//! through [`RecordReader`], so identifier derivation is identical on the way
//! out and on the way back.

use std::io::{self, BufRead};

use serde_json::{Map, Value as JsonValue};

/// A single scenario record with its caller-assigned identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRecord {
    pub record_id: String,
    /// `false` when `record_id` is the positional `req_<index>` fallback.
    pub has_explicit_id: bool,
    /// Zero-based line index in the input stream.
    pub line_index: usize,
    pub attributes: Map<String, JsonValue>,
    raw: String,
}

impl DomainRecord {
    /// Parse one input line. Returns `None` when the line is not a JSON object.
    pub fn parse(line: &str, line_index: usize, id_field: &str) -> Option<Self> {
        let trimmed = line.trim();
        let attributes = match serde_json::from_str::<JsonValue>(trimmed) {
            Ok(JsonValue::Object(map)) => map,
            _ => return None,
        };
        let explicit = attributes.get(id_field).and_then(normalize_id);
        let has_explicit_id = explicit.is_some();
        let record_id = explicit.unwrap_or_else(|| positional_id(line_index));
        Some(Self {
            record_id,
            has_explicit_id,
            line_index,
            attributes,
            raw: trimmed.to_string(),
        })
    }

    /// Original line text, without the trailing newline.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Record with an extra `validation_status` field appended.
    pub fn tagged(&self, status: &str) -> JsonValue {
        let mut attributes = self.attributes.clone();
        attributes.insert(
            "validation_status".to_string(),
            JsonValue::String(status.to_string()),
        );
        JsonValue::Object(attributes)
    }
}

/// Fallback correlation id for records that carry no identifier.
pub fn positional_id(line_index: usize) -> String {
    format!("req_{line_index}")
}

/// Normalize an identifier value to a string; numbers keep their JSON text.
pub fn normalize_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Outcome of reading one non-blank input line.
#[derive(Debug)]
pub enum RecordLine {
    Record(DomainRecord),
    Malformed { line_index: usize },
}

/// Iterator over the records of a newline-delimited JSON stream.
///
/// Blank lines are ignored. Lines that fail to parse, including lines that are
/// not valid UTF-8, are yielded as [`RecordLine::Malformed`] so callers can
/// count them and keep going; only I/O failures end the stream with an error.
pub struct RecordReader<R> {
    reader: R,
    buf: Vec<u8>,
    id_field: String,
    next_index: usize,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R, id_field: impl Into<String>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            id_field: id_field.into(),
            next_index: 0,
        }
    }
}

/// Read one `\n`-terminated line into `buf` as raw bytes.
///
/// Returns `Ok(false)` at end of stream.
pub(crate) fn read_raw_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    Ok(reader.read_until(b'\n', buf)? > 0)
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = io::Result<RecordLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match read_raw_line(&mut self.reader, &mut self.buf) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => return Some(Err(err)),
            }
            let line_index = self.next_index;
            self.next_index += 1;
            let Ok(line) = std::str::from_utf8(&self.buf) else {
                tracing::warn!(line = line_index, "skipping input record with invalid UTF-8");
                return Some(Ok(RecordLine::Malformed { line_index }));
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(Ok(match DomainRecord::parse(line, line_index, &self.id_field) {
                Some(record) => RecordLine::Record(record),
                None => {
                    tracing::warn!(line = line_index, "skipping malformed input record");
                    RecordLine::Malformed { line_index }
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(input: &str) -> Vec<RecordLine> {
        RecordReader::new(Cursor::new(input.to_string()), "id")
            .collect::<io::Result<Vec<_>>>()
            .expect("in-memory reads cannot fail")
    }

    #[test]
    fn numeric_ids_are_normalized_to_strings() {
        let record = DomainRecord::parse(r#"{"id": 42, "crop": "wheat"}"#, 0, "id")
            .expect("valid record");
        assert_eq!(record.record_id, "42");
        assert!(record.has_explicit_id);
    }

    #[test]
    fn missing_id_falls_back_to_line_position() {
        let lines = read_all("{\"crop\":\"rice\"}\n\n{\"crop\":\"maize\"}\n");
        let ids: Vec<String> = lines
            .into_iter()
            .filter_map(|line| match line {
                RecordLine::Record(record) => Some(record.record_id),
                RecordLine::Malformed { .. } => None,
            })
            .collect();
        assert_eq!(ids, vec!["req_0".to_string(), "req_2".to_string()]);
    }

    #[test]
    fn malformed_lines_are_reported_not_fatal() {
        let lines = read_all("{\"id\":\"a\"}\nnot json\n[1,2]\n{\"id\":\"b\"}\n");
        assert_eq!(lines.len(), 4);
        assert!(matches!(lines[1], RecordLine::Malformed { line_index: 1 }));
        assert!(matches!(lines[2], RecordLine::Malformed { line_index: 2 }));
        assert!(matches!(&lines[3], RecordLine::Record(r) if r.record_id == "b"));
    }

    #[test]
    fn invalid_utf8_line_is_malformed_and_reading_continues() {
        let mut input = b"{\"id\":\"1\"}\n{\"id\":\"".to_vec();
        input.extend_from_slice(&[0xE0, 0xA4]);
        input.extend_from_slice(b"\"}\n{\"id\":\"3\"}");
        let lines = RecordReader::new(Cursor::new(input), "id")
            .collect::<io::Result<Vec<_>>>()
            .expect("decode failures are not read errors");

        assert_eq!(lines.len(), 3);
        assert!(matches!(&lines[0], RecordLine::Record(r) if r.record_id == "1"));
        assert!(matches!(lines[1], RecordLine::Malformed { line_index: 1 }));
        assert!(matches!(&lines[2], RecordLine::Record(r) if r.record_id == "3"));
    }

    #[test]
    fn tagged_appends_status_and_keeps_fields() {
        let record =
            DomainRecord::parse(r#"{"id":"7","crop":{"id":"c1","label":"Cotton"}}"#, 0, "id")
                .expect("valid record");
        let tagged = record.tagged("MISSING_DECISION");
        assert_eq!(tagged["validation_status"], "MISSING_DECISION");
        assert_eq!(tagged["crop"]["label"], "Cotton");
        assert_eq!(record.raw(), r#"{"id":"7","crop":{"id":"c1","label":"Cotton"}}"#);
    }
}
