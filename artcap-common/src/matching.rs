//! Record resolution: find-or-create by metadata signature
//!
//! Repeated photo captures for the same physical record accumulate onto one
//! row instead of creating duplicates, while explicit "new record" actions
//! always create a fresh row. The per-session current-record pointer is an
//! explicit parameter here; the caller owns persisting the returned value.

use crate::coerce::CoercedValues;
use crate::db::{self, GpsColumns};
use crate::schema::ObjectTypeSchema;
use crate::signature::meta_signature;
use crate::time::TimeFormats;
use crate::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

/// Outcome of resolving a submission to a target record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub record_id: i64,
    /// True when resolution inserted a new row
    pub created: bool,
}

/// Reject the submission if any required field coerced to empty/null.
/// Runs before any database mutation.
pub fn check_required(schema: &ObjectTypeSchema, values: &CoercedValues) -> Result<()> {
    let mut missing = Vec::new();
    for column in schema.required_columns() {
        let satisfied = match values.get(column) {
            Some(Value::String(s)) => !s.trim().is_empty() && s != "[]",
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !satisfied {
            missing.push(column);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

/// Resolve the target record for a submission with the given coerced
/// values: the session's current record if its signature still matches,
/// else the newest record with the same signature, else a new row.
///
/// The caller must have run `check_required` first.
pub async fn resolve_record(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    values: &CoercedValues,
    session_current: Option<i64>,
    gps: GpsColumns,
    formats: &TimeFormats,
) -> Result<ResolveOutcome> {
    let signature = meta_signature(schema, values);

    if let Some(current) = session_current {
        if let Some(stored) = db::get_signature(pool, schema, current).await? {
            if stored == signature {
                debug!("{} submission matched session record {}", schema.otype, current);
                return Ok(ResolveOutcome {
                    record_id: current,
                    created: false,
                });
            }
        }
    }

    if let Some(id) = db::find_by_signature(pool, schema, &signature).await? {
        debug!("{} submission matched stored record {}", schema.otype, id);
        return Ok(ResolveOutcome {
            record_id: id,
            created: false,
        });
    }

    let id = db::insert_record(pool, schema, values, &signature, gps, formats).await?;
    debug!("{} submission created record {}", schema.otype, id);
    Ok(ResolveOutcome {
        record_id: id,
        created: true,
    })
}

/// Explicit "new record" action: always inserts, even when an
/// identical-signature row exists.
pub async fn create_record(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    values: &CoercedValues,
    gps: GpsColumns,
    formats: &TimeFormats,
) -> Result<i64> {
    let signature = meta_signature(schema, values);
    db::insert_record(pool, schema, values, &signature, gps, formats).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::{coerce, FormValues};
    use crate::config::ObjectTypeConfig;
    use crate::db::{ensure_tables, init_memory_database};

    fn test_schema() -> ObjectTypeSchema {
        let fields = [
            vec!["Unit", "unit", "TEXT"],
            vec!["Level", "level", "TEXT"],
            vec!["T-Number", "tnumber", "TEXT"],
            vec!["Recorded", "date_recorded", "TIMESTAMP"],
        ];
        let cfg = ObjectTypeConfig {
            label: None,
            filename_format: String::new(),
            input_fields: fields
                .iter()
                .map(|f| f.iter().map(|s| s.to_string()).collect())
                .collect(),
            required_fields: vec!["unit".to_string(), "level".to_string()],
            index_fields: Vec::new(),
        };
        ObjectTypeSchema::normalize("artifacts", &cfg).unwrap()
    }

    fn form(pairs: &[(&str, &str)]) -> FormValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    async fn setup() -> (SqlitePool, ObjectTypeSchema) {
        let pool = init_memory_database().await.unwrap();
        let schema = test_schema();
        ensure_tables(&pool, [&schema]).await.unwrap();
        (pool, schema)
    }

    #[test]
    fn test_required_gate_rejects_each_missing_field() {
        let schema = test_schema();
        let formats = TimeFormats::default();

        for missing in ["unit", "level"] {
            let mut values = coerce(
                &schema,
                &form(&[("unit", "A"), ("level", "2")]),
                false,
                &formats,
            );
            values.insert(missing.to_string(), Value::Null);
            let err = check_required(&schema, &values).unwrap_err();
            assert!(err.to_string().contains(missing));
        }

        let values = coerce(
            &schema,
            &form(&[("unit", "A"), ("level", "2")]),
            false,
            &formats,
        );
        assert!(check_required(&schema, &values).is_ok());
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (pool, schema) = setup().await;
        let formats = TimeFormats::default();
        let values = coerce(
            &schema,
            &form(&[("unit", "A"), ("level", "2"), ("tnumber", "T5")]),
            false,
            &formats,
        );

        let first = resolve_record(&pool, &schema, &values, None, GpsColumns::default(), &formats)
            .await
            .unwrap();
        assert!(first.created);

        // second submission without a session pointer reuses the row
        let second = resolve_record(&pool, &schema, &values, None, GpsColumns::default(), &formats)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.record_id, first.record_id);
    }

    #[tokio::test]
    async fn test_session_pointer_wins_when_signature_matches() {
        let (pool, schema) = setup().await;
        let formats = TimeFormats::default();
        let values = coerce(
            &schema,
            &form(&[("unit", "A"), ("level", "2")]),
            false,
            &formats,
        );

        let a = create_record(&pool, &schema, &values, GpsColumns::default(), &formats)
            .await
            .unwrap();
        let b = create_record(&pool, &schema, &values, GpsColumns::default(), &formats)
            .await
            .unwrap();
        assert!(b > a);

        // without a pointer, the newest row wins
        let resolved = resolve_record(&pool, &schema, &values, None, GpsColumns::default(), &formats)
            .await
            .unwrap();
        assert_eq!(resolved.record_id, b);

        // the session pointer keeps the older row current
        let resolved = resolve_record(
            &pool,
            &schema,
            &values,
            Some(a),
            GpsColumns::default(),
            &formats,
        )
        .await
        .unwrap();
        assert_eq!(resolved.record_id, a);
    }

    #[tokio::test]
    async fn test_stale_session_pointer_is_ignored() {
        let (pool, schema) = setup().await;
        let formats = TimeFormats::default();
        let values_a = coerce(
            &schema,
            &form(&[("unit", "A"), ("level", "2")]),
            false,
            &formats,
        );
        let values_b = coerce(
            &schema,
            &form(&[("unit", "B"), ("level", "2")]),
            false,
            &formats,
        );

        let a = create_record(&pool, &schema, &values_a, GpsColumns::default(), &formats)
            .await
            .unwrap();

        // pointer at record A, but submission carries different metadata
        let resolved = resolve_record(
            &pool,
            &schema,
            &values_b,
            Some(a),
            GpsColumns::default(),
            &formats,
        )
        .await
        .unwrap();
        assert!(resolved.created);
        assert_ne!(resolved.record_id, a);
    }

    #[tokio::test]
    async fn test_new_record_override_duplicates_signature() {
        let (pool, schema) = setup().await;
        let formats = TimeFormats::default();
        let values = coerce(
            &schema,
            &form(&[("unit", "A"), ("level", "2")]),
            false,
            &formats,
        );

        let first = create_record(&pool, &schema, &values, GpsColumns::default(), &formats)
            .await
            .unwrap();
        let second = create_record(&pool, &schema, &values, GpsColumns::default(), &formats)
            .await
            .unwrap();
        assert_ne!(first, second);
    }
}
