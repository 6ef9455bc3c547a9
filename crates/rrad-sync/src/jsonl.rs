//! Bulk export JSONL parsing.

use std::collections::HashMap;

use rrad_core::gid_kind;
use serde_json::Value as JsonValue;
use tracing::warn;

/// One object from a bulk export, with any child lines that referenced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub body: JsonValue,
    pub children: Vec<JsonValue>,
}

impl ExportRecord {
    /// Resource type from the global id, e.g. `Order` or `Refund`.
    pub fn kind(&self) -> Option<&str> {
        gid_kind(&self.id)
    }
}

/// Parse an export into records in first-seen order.
///
/// Total over any input: blank lines, malformed JSON and lines without an
/// `id` are dropped. A child line is kept as its own record and, when its
/// parent has already been seen, also appended to the parent's `children`.
/// A repeated id replaces the earlier record in place.
pub fn parse_jsonl(text: &str) -> Vec<ExportRecord> {
    let mut records: Vec<ExportRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let body: JsonValue = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    line = line_no + 1,
                    error = %err,
                    preview = %preview(line),
                    "skipping malformed export line"
                );
                continue;
            }
        };

        let Some(id) = body.get("id").and_then(JsonValue::as_str).filter(|id| !id.is_empty()) else {
            continue;
        };
        let id = id.to_string();
        let parent_id = body
            .get("__parentId")
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        if let Some(parent) = parent_id.as_deref().and_then(|p| index.get(p).copied()) {
            records[parent].children.push(body.clone());
        }

        let record = ExportRecord {
            id: id.clone(),
            parent_id,
            body,
            children: Vec::new(),
        };
        match index.get(&id) {
            Some(&slot) => records[slot] = record,
            None => {
                index.insert(id, records.len());
                records.push(record);
            }
        }
    }

    records
}

fn preview(line: &str) -> String {
    line.chars().take(100).collect()
}
