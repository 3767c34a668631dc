//! Metadata signature computation
//!
//! The signature decides whether a new submission belongs to an existing
//! record. It is the compact, sorted-key JSON encoding of every coerced
//! non-timestamp field value; timestamp-family and server-managed fields
//! are excluded so two photos taken seconds apart with otherwise identical
//! metadata still land on the same record.

use crate::coerce::CoercedValues;
use crate::schema::ObjectTypeSchema;
use serde_json::Value;
use std::collections::BTreeMap;

/// Compute the canonical record-matching signature for a set of coerced
/// values. Identical inputs produce byte-identical signatures.
pub fn meta_signature(schema: &ObjectTypeSchema, values: &CoercedValues) -> String {
    let mut keyed: BTreeMap<&str, &Value> = BTreeMap::new();
    for field in &schema.fields {
        if field.kind.is_timestamp_family() || field.server_managed {
            continue;
        }
        if let Some(value) = values.get(&field.column) {
            keyed.insert(field.column.as_str(), value);
        }
    }
    // BTreeMap iteration order gives the sorted-key canonical encoding;
    // Value's Display renders compact JSON with no whitespace.
    serde_json::to_value(&keyed)
        .unwrap_or(Value::Null)
        .to_string()
}
