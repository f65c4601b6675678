use anyhow::{Context, Result, anyhow, bail};
use faultline_core::TaskRecord;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Load task records from a `.json` array or a JSON-lines file.
///
/// Repeated `task_id`s keep their first record.
pub fn read_metadata(path: &Path) -> Result<Vec<TaskRecord>> {
    let is_array = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let records = if is_array {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read metadata {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("metadata {} is not valid JSON", path.display()))?;
        let items = value
            .as_array()
            .ok_or_else(|| anyhow!("metadata {} must be a JSON array", path.display()))?;
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| record_from_value(item, &format!("record {}", idx + 1)))
            .collect::<Result<Vec<_>>>()?
    } else {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open metadata {}", path.display()))?;
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let location = format!("line {}", idx + 1);
            let value: Value = serde_json::from_str(&line)
                .with_context(|| format!("metadata {}: {location} is not valid JSON", path.display()))?;
            out.push(record_from_value(&value, &location)?);
        }
        out
    };

    let mut seen = HashSet::new();
    Ok(records
        .into_iter()
        .filter(|r| seen.insert(r.task_id.clone()))
        .collect())
}

/// Map one metadata object onto a [`TaskRecord`].
///
/// Accepts both the annotated dataset layout (`Question`,
/// `Annotator Metadata.Steps`) and the flat layout (`question`, `steps`).
pub fn record_from_value(value: &Value, location: &str) -> Result<TaskRecord> {
    let task_id = match value.get("task_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => bail!("metadata {location}: record has no task_id"),
    };
    let question = string_field(value, &["Question", "question"]).unwrap_or_default();
    let steps_text = value
        .get("Annotator Metadata")
        .and_then(|m| m.get("Steps"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| string_field(value, &["steps", "steps_text"]))
        .unwrap_or_default();

    Ok(TaskRecord {
        task_id,
        steps_text,
        question,
        file_name: non_empty(string_field(value, &["file_name"])),
        file_path: non_empty(string_field(value, &["file_path"])),
        code: non_empty(string_field(value, &["code"])),
    })
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(ToString::to_string)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
