//! Prompt texts sent with batch requests.

use serde_json::Value as JsonValue;

use crate::pipeline::record::DomainRecord;

/// Advisory generation prompt. `{data_json}` is replaced with the record.
pub(crate) const ADVISORY_PROMPT_TEMPLATE: &str = r#"Role: Expert Agricultural Advisor for Indian farmers (Kisan Mitra).
Language: Hindi (strictly).

Input Data (JSON):
```json
{data_json}
```

Task:
The data bundle describes one agricultural scenario (crop, weather, soil, pest, disease, growth stage and related constraints).

Step 1: Feasibility analysis.
Compare the crop requirements (temperature, rainfall and so on) against the given weather and every other constraint.

Step 2: Advisory.
- If the scenario is impossible or fatal for the crop: say clearly that farming this crop is not recommended and explain why. Do not give generic care tips for a failing crop.
- If the scenario is stressful but salvageable: name the stress and give specific mitigation steps.
- If the scenario is ideal: focus on yield maximization and standard care.

Constraints:
- Output strictly valid JSON with a single key: "advisory_hindi".
- Use simple, clear Hindi suitable for farmers, with bullet points for steps.
- Reference specific numbers from the input where they are provided."#;

/// System instruction for chunked scenario classification.
pub(crate) const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"You are an expert agricultural scientist validating synthetic farming scenarios.
Reject a scenario when any attribute contradicts another, for example:
1. Pest/crop mismatch (Pink Bollworm affects cotton only).
2. Weather/stress mismatch (drought cannot happen during heavy rain).
3. Healthy mismatch (no stress cannot coexist with frost or drought).
Output: a JSON object mapping every scenario id to 1 (valid) or 0 (invalid).
Example: {"1": 1, "2": 0}"#;

pub(crate) fn advisory_prompt(record: &DomainRecord) -> String {
    let data_json = serde_json::to_string_pretty(&record.attributes)
        .unwrap_or_else(|_| record.raw().to_string());
    ADVISORY_PROMPT_TEMPLATE.replace("{data_json}", &data_json)
}

pub(crate) fn classification_prompt(scenarios: &[JsonValue]) -> String {
    let listing = serde_json::to_string(scenarios).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Classify these {count} scenarios.\nReturn a JSON object mapping each id to 0 or 1.\nScenarios: {listing}",
        count = scenarios.len()
    )
}

/// Compact one-line description of a record built from `fields`.
///
/// Object attributes render as `Label (id)`, scalars verbatim; absent fields
/// are left out.
pub(crate) fn summarize_record(record: &DomainRecord, fields: &[String]) -> String {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let Some(value) = record.attributes.get(field) else {
            continue;
        };
        let rendered = match value {
            JsonValue::Object(map) => {
                let label = map.get("label").and_then(JsonValue::as_str);
                let id = map.get("id").and_then(JsonValue::as_str);
                match (label, id) {
                    (Some(label), Some(id)) => format!("{label} ({id})"),
                    (Some(label), None) => label.to_string(),
                    (None, Some(id)) => id.to_string(),
                    (None, None) => JsonValue::Object(map.clone()).to_string(),
                }
            }
            JsonValue::String(s) => s.clone(),
            JsonValue::Null => continue,
            other => other.to_string(),
        };
        parts.push(format!("{}: {rendered}", display_name(field)));
    }
    parts.join(", ")
}

fn display_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut word_start = true;
    for ch in field.chars() {
        if ch == '_' {
            out.push(' ');
            word_start = true;
        } else if word_start {
            out.extend(ch.to_uppercase());
            word_start = false;
        } else {
            out.push(ch);
        }
    }
    out
}
