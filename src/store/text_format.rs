//! PostgreSQL COPY text format: one row per line, tab-separated columns,
//! `\N` for null, backslash escapes inside values, no header.

use crate::error::{BulkError, WriteResult};
use crate::model::{ColumnDef, ColumnKind, FieldValue};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

pub const DELIMITER: char = '\t';
pub const NULL_SENTINEL: &str = "\\N";

pub fn escape_text(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

pub fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn encode_value(value: &FieldValue, out: &mut String) {
    match value {
        FieldValue::Null => out.push_str(NULL_SENTINEL),
        FieldValue::Bool(value) => out.push(if *value { 't' } else { 'f' }),
        FieldValue::Int(value) => out.push_str(&value.to_string()),
        FieldValue::Float(value) if value.is_infinite() => {
            out.push_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
        }
        FieldValue::Float(value) => out.push_str(&value.to_string()),
        FieldValue::Text(value) => escape_text(value, out),
        FieldValue::Uuid(value) => out.push_str(&value.to_string()),
        FieldValue::Timestamp(value) => {
            out.push_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
    }
}

/// Appends one line per row to `out`.
pub fn encode_rows<'a>(rows: impl IntoIterator<Item = &'a [FieldValue]>, out: &mut String) {
    for row in rows {
        for (index, value) in row.iter().enumerate() {
            if index > 0 {
                out.push(DELIMITER);
            }
            encode_value(value, out);
        }
        out.push('\n');
    }
}

pub fn decode_value(raw: &str, kind: ColumnKind) -> Result<FieldValue, String> {
    if raw == NULL_SENTINEL {
        return Ok(FieldValue::Null);
    }

    let text = unescape_text(raw);
    match kind {
        ColumnKind::Text => Ok(FieldValue::Text(text)),
        ColumnKind::Bool => match text.as_str() {
            "t" | "true" | "1" => Ok(FieldValue::Bool(true)),
            "f" | "false" | "0" => Ok(FieldValue::Bool(false)),
            other => Err(format!("invalid boolean {other:?}")),
        },
        ColumnKind::Int => text
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|e| format!("invalid integer {text:?}: {e}")),
        ColumnKind::Float => text
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|e| format!("invalid float {text:?}: {e}")),
        ColumnKind::Uuid => Uuid::parse_str(&text)
            .map(FieldValue::Uuid)
            .map_err(|e| format!("invalid uuid {text:?}: {e}")),
        ColumnKind::Timestamp => parse_timestamp(&text).map(FieldValue::Timestamp),
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // timestamptz as printed by the server: 2024-05-01 10:00:00.25+00
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {text:?}: {e}"))
}

/// Decodes a payload into rows of `columns.len()` values.
pub fn decode_rows(payload: &str, columns: &[ColumnDef]) -> WriteResult<Vec<Vec<FieldValue>>> {
    let mut rows = Vec::new();

    for (index, line) in payload.lines().enumerate() {
        let fields: Vec<&str> = line.split(DELIMITER).collect();
        if fields.len() != columns.len() {
            return Err(BulkError::Decode {
                line: index + 1,
                message: format!("expected {} fields, found {}", columns.len(), fields.len()),
            });
        }

        let row = fields
            .iter()
            .zip(columns)
            .map(|(raw, column)| {
                decode_value(raw, column.kind).map_err(|message| BulkError::Decode {
                    line: index + 1,
                    message: format!("column {}: {}", column.name, message),
                })
            })
            .collect::<WriteResult<Vec<_>>>()?;
        rows.push(row);
    }

    Ok(rows)
}
