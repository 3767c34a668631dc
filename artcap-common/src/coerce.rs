//! Form value coercion
//!
//! Converts raw form/CSV input into typed values per field. Malformed
//! business data (unparseable numbers or dates) is stored as null, never
//! rejected; only programming errors and validation gates reject a
//! submission, and those live elsewhere.

use crate::schema::{FieldKind, ObjectTypeSchema, Widget};
use crate::time::{now_stamp, TimeFormats};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Raw submitted values: one or more strings per field name.
/// Multi-select fields carry one entry per selected option.
pub type FormValues = HashMap<String, Vec<String>>;

/// Coerced values for one submission, keyed by column name
pub type CoercedValues = BTreeMap<String, Value>;

/// Coerce raw form values against a schema, in field declaration order.
///
/// With `allow_missing` (partial edits, existence checks) fields that were
/// not submitted or submitted empty are omitted entirely; otherwise they
/// coerce to null. Server-managed fields ignore client input: on a full
/// coercion every one is stamped with the current time, on a partial
/// coercion only the bump-on-update fields are.
pub fn coerce(
    schema: &ObjectTypeSchema,
    form: &FormValues,
    allow_missing: bool,
    formats: &TimeFormats,
) -> CoercedValues {
    let mut out = CoercedValues::new();
    let now = now_stamp(formats);

    for field in &schema.fields {
        if field.server_managed {
            if !allow_missing || field.bump_on_update {
                out.insert(field.column.clone(), Value::String(now.clone()));
            }
            continue;
        }

        if matches!(field.widget, Widget::Constant) {
            out.insert(
                field.column.clone(),
                Value::String(field.constant_value.clone().unwrap_or_default()),
            );
            continue;
        }

        if field.is_multi_select() {
            let selected: Vec<&str> = form
                .get(&field.column)
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.trim())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            if selected.is_empty() {
                if !allow_missing {
                    out.insert(field.column.clone(), Value::Null);
                }
            } else {
                out.insert(field.column.clone(), Value::String(compact_array(&selected)));
            }
            continue;
        }

        let raw = form
            .get(&field.column)
            .and_then(|values| values.first())
            .map(String::as_str);
        let trimmed = raw.unwrap_or("").trim();
        if trimmed.is_empty() {
            if !allow_missing {
                out.insert(field.column.clone(), Value::Null);
            }
            continue;
        }

        let value = match field.kind {
            FieldKind::Int => trimmed
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::Null),
            FieldKind::Float => trimmed
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .unwrap_or(Value::Null),
            FieldKind::Date => match parse_user_date(trimmed) {
                Some(date) => Value::String(date.format(&formats.date).to_string()),
                None => Value::Null,
            },
            FieldKind::Timestamp => match parse_user_date(trimmed) {
                // Users shouldn't need to type timestamps; a bare date is
                // accepted and normalized to midnight.
                Some(date) => Value::String(format!("{}T00:00:00", date.format("%Y-%m-%d"))),
                None => Value::Null,
            },
            FieldKind::Uppercase => Value::String(trimmed.to_uppercase()),
            FieldKind::Text | FieldKind::Constant => Value::String(trimmed.to_string()),
        };
        out.insert(field.column.clone(), value);
    }

    out
}

/// Compact JSON array encoding for multi-select values, preserving the
/// client's selection order
fn compact_array(values: &[&str]) -> String {
    Value::Array(values.iter().map(|v| Value::String(v.to_string())).collect()).to_string()
}

/// Flexible day-first date parsing.
///
/// Accepts:
/// - 6 digits as DDMMYY (years 50-99 are 19xx, 00-49 are 20xx)
/// - 8 digits as DDMMYYYY
/// - common day-first separators (`2/3/1986`, `02-03-1986`, `2.3.86`)
/// - ISO `1986-03-02`
///
/// Returns None for anything unparseable or calendar-invalid.
pub fn parse_user_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() >= 6 && s.len() <= 8 && s.chars().all(|c| c.is_ascii_digit()) {
        return match s.len() {
            6 => {
                let (dd, mm, yy) = (num(&s[0..2])?, num(&s[2..4])?, num(&s[4..6])?);
                let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };
                NaiveDate::from_ymd_opt(year as i32, mm, dd)
            }
            8 => {
                let (dd, mm, yyyy) = (num(&s[0..2])?, num(&s[2..4])?, num(&s[4..8])?);
                NaiveDate::from_ymd_opt(yyyy as i32, mm, dd)
            }
            _ => None,
        };
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d/%m/%Y",
        "%d-%m-%Y",
        "%d.%m.%Y",
        "%d %m %Y",
        "%d/%m/%y",
        "%d-%m-%y",
        "%d.%m.%y",
    ];
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }
    None
}

fn num(s: &str) -> Option<u32> {
    s.parse().ok()
}
