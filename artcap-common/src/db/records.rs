//! Record store operations
//!
//! One table per object type, keyed by auto-incrementing integer id.
//! File-list columns are append-only JSON arrays kept index-parallel
//! across images/thumbs/webps/sidecars; mutation helpers here preserve
//! that invariant.

use crate::coerce::CoercedValues;
use crate::schema::{FieldDef, FieldKind, ObjectTypeSchema};
use crate::time::{now_stamp, TimeFormats};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// The four index-parallel file lists of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileLists {
    pub images: Vec<String>,
    pub thumbs: Vec<String>,
    pub webps: Vec<String>,
    pub sidecars: Vec<String>,
}

impl FileLists {
    /// Length of the longest list (lists only diverge in legacy data)
    pub fn len(&self) -> usize {
        self.images
            .len()
            .max(self.thumbs.len())
            .max(self.webps.len())
            .max(self.sidecars.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All filenames across the four lists, empty placeholders skipped
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .chain(&self.thumbs)
            .chain(&self.webps)
            .chain(&self.sidecars)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }
}

/// GPS column values for insert/update
#[derive(Debug, Clone, Copy, Default)]
pub struct GpsColumns {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub acc: Option<f64>,
}

impl GpsColumns {
    /// A usable fix needs both latitude and longitude
    pub fn has_fix(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

/// Capture context persisted alongside an attached image
#[derive(Debug, Clone, Default)]
pub struct CaptureRow {
    pub img_width: i64,
    pub img_height: i64,
    pub captured_at: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub exif_json: Option<String>,
}

/// One decoded record row
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub id: i64,
    /// User field values by column name
    pub fields: BTreeMap<String, Value>,
    pub meta_signature: Option<String>,
    pub files: FileLists,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub gps_alt: Option<f64>,
    pub gps_acc: Option<f64>,
    pub img_width: Option<i64>,
    pub img_height: Option<i64>,
    pub captured_at: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub exif: Option<Value>,
    pub date_last_saved: Option<String>,
}

/// One page of records plus pagination metadata
#[derive(Debug, Serialize)]
pub struct RecordPage {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
    pub records: Vec<Record>,
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::String(s) => query.bind(s.as_str()),
        Value::Bool(b) => query.bind(*b),
        other => query.bind(other.to_string()),
    }
}

/// Insert a new record with coerced field values, empty file lists, and the
/// computed signature. Returns the assigned id.
pub async fn insert_record(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    values: &CoercedValues,
    signature: &str,
    gps: GpsColumns,
    formats: &TimeFormats,
) -> Result<i64> {
    let mut columns: Vec<String> = values.keys().map(|c| format!("\"{}\"", c)).collect();
    columns.extend(
        [
            "meta_signature",
            "images_json",
            "thumbs_json",
            "webps_json",
            "json_files_json",
            "gps_lat",
            "gps_lon",
            "gps_alt",
            "gps_acc",
            "date_last_saved",
        ]
        .map(String::from),
    );
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.otype,
        columns.join(", "),
        placeholders
    );

    let mut query = sqlx::query(&sql);
    for value in values.values() {
        query = bind_value(query, value);
    }
    query = query.bind(signature);
    for _ in 0..4 {
        query = query.bind("[]");
    }
    query = query
        .bind(gps.lat)
        .bind(gps.lon)
        .bind(gps.alt)
        .bind(gps.acc)
        .bind(now_stamp(formats));

    let result = query.execute(pool).await?;
    Ok(result.last_insert_rowid())
}

/// Load one record, or `NotFound`
pub async fn get_record(pool: &SqlitePool, schema: &ObjectTypeSchema, id: i64) -> Result<Record> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", schema.otype);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{} record {}", schema.otype, id)))?;
    Ok(decode_record(schema, &row))
}

/// Stored signature for a record, or None if the row is gone
pub async fn get_signature(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    id: i64,
) -> Result<Option<String>> {
    let sql = format!("SELECT meta_signature FROM {} WHERE id = ?", schema.otype);
    let row: Option<(Option<String>,)> = sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;
    Ok(row.and_then(|r| r.0))
}

/// Most recently created record carrying this signature
pub async fn find_by_signature(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    signature: &str,
) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE meta_signature = ? ORDER BY id DESC LIMIT 1",
        schema.otype
    );
    let row: Option<(i64,)> = sqlx::query_as(&sql)
        .bind(signature)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0))
}

/// Existence check: every supplied non-empty field must equal the stored
/// value; server-managed fields never participate. Newest match wins.
pub async fn exists_matching(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    values: &CoercedValues,
) -> Result<Option<i64>> {
    let mut predicates = Vec::new();
    let mut params: Vec<&Value> = Vec::new();
    for field in &schema.fields {
        if field.server_managed {
            continue;
        }
        let Some(value) = values.get(&field.column) else {
            continue;
        };
        match value {
            Value::Null => continue,
            Value::String(s) if s.trim().is_empty() => continue,
            _ => {}
        }
        predicates.push(format!("\"{}\" = ?", field.column));
        params.push(value);
    }

    if predicates.is_empty() {
        return Ok(None);
    }

    let sql = format!(
        "SELECT id FROM {} WHERE {} ORDER BY id DESC LIMIT 1",
        schema.otype,
        predicates.join(" AND ")
    );
    let mut query = sqlx::query(&sql);
    for value in params {
        query = bind_value(query, value);
    }
    let row = query.fetch_optional(pool).await?;
    Ok(row.map(|r| r.get::<i64, _>("id")))
}

/// Apply column updates in place. Always bumps `date_last_saved`.
pub async fn update_record(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    id: i64,
    values: &CoercedValues,
    gps: GpsColumns,
    formats: &TimeFormats,
) -> Result<()> {
    let mut sets: Vec<String> = values.keys().map(|c| format!("\"{}\" = ?", c)).collect();
    sets.push("date_last_saved = ?".to_string());
    if gps.has_fix() {
        sets.extend(
            ["gps_lat = ?", "gps_lon = ?", "gps_alt = ?", "gps_acc = ?"].map(String::from),
        );
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        schema.otype,
        sets.join(", ")
    );
    let mut query = sqlx::query(&sql);
    for value in values.values() {
        query = bind_value(query, value);
    }
    query = query.bind(now_stamp(formats));
    if gps.has_fix() {
        query = query.bind(gps.lat).bind(gps.lon).bind(gps.alt).bind(gps.acc);
    }
    let result = query.bind(id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("{} record {}", schema.otype, id)));
    }
    Ok(())
}

/// Persist the appended file lists and capture context after an image
/// attach. GPS columns are only written when a fix was resolved.
pub async fn update_after_attach(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    id: i64,
    files: &FileLists,
    gps: Option<GpsColumns>,
    capture: &CaptureRow,
    formats: &TimeFormats,
) -> Result<()> {
    let mut sets = vec![
        "images_json = ?",
        "thumbs_json = ?",
        "webps_json = ?",
        "json_files_json = ?",
        "img_width = ?",
        "img_height = ?",
        "captured_at = ?",
        "client_ip = ?",
        "user_agent = ?",
        "exif_json = ?",
        "date_last_saved = ?",
    ];
    if gps.is_some() {
        sets.extend(["gps_lat = ?", "gps_lon = ?", "gps_alt = ?", "gps_acc = ?"]);
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        schema.otype,
        sets.join(", ")
    );
    let mut query = sqlx::query(&sql)
        .bind(encode_list(&files.images))
        .bind(encode_list(&files.thumbs))
        .bind(encode_list(&files.webps))
        .bind(encode_list(&files.sidecars))
        .bind(capture.img_width)
        .bind(capture.img_height)
        .bind(capture.captured_at.as_deref())
        .bind(capture.client_ip.as_deref())
        .bind(capture.user_agent.as_deref())
        .bind(capture.exif_json.as_deref())
        .bind(now_stamp(formats));
    if let Some(fix) = gps {
        query = query.bind(fix.lat).bind(fix.lon).bind(fix.alt).bind(fix.acc);
    }
    let result = query.bind(id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("{} record {}", schema.otype, id)));
    }
    Ok(())
}

/// Delete a record and every file its lists reference. Files go first so a
/// crash mid-delete leaves at worst an orphaned row, never orphaned files
/// referencing a gone row. Missing files are not an error.
pub async fn delete_record(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    upload_dir: &Path,
    id: i64,
) -> Result<()> {
    let record = get_record(pool, schema, id).await?;

    for name in record.files.all_names() {
        remove_upload(upload_dir, name);
    }
    remove_upload(
        upload_dir,
        &crate::sidecar::record_sidecar_name(&schema.otype, id),
    );

    let sql = format!("DELETE FROM {} WHERE id = ?", schema.otype);
    sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(())
}

/// Remove one image index from every file list, deleting the files
/// best-effort, and persist the shortened lists.
pub async fn delete_image(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    upload_dir: &Path,
    id: i64,
    index: usize,
    formats: &TimeFormats,
) -> Result<()> {
    let record = get_record(pool, schema, id).await?;
    if index >= record.files.len() {
        return Err(Error::InvalidInput(format!(
            "image index {} out of range for {} record {}",
            index, schema.otype, id
        )));
    }

    let mut files = record.files;
    for list in [
        &mut files.images,
        &mut files.thumbs,
        &mut files.webps,
        &mut files.sidecars,
    ] {
        if index < list.len() {
            let removed = list.remove(index);
            remove_upload(upload_dir, &removed);
        }
    }

    let sql = format!(
        "UPDATE {} SET images_json = ?, thumbs_json = ?, webps_json = ?, \
         json_files_json = ?, date_last_saved = ? WHERE id = ?",
        schema.otype
    );
    sqlx::query(&sql)
        .bind(encode_list(&files.images))
        .bind(encode_list(&files.thumbs))
        .bind(encode_list(&files.webps))
        .bind(encode_list(&files.sidecars))
        .bind(now_stamp(formats))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Paged listing, newest first, with optional free-text substring search
/// across the id and all text-typed user fields.
pub async fn list_records(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    q: Option<&str>,
    page: i64,
    per_page: i64,
) -> Result<RecordPage> {
    let per_page = per_page.clamp(1, 500);
    let q = q.map(str::trim).filter(|s| !s.is_empty());

    let searchable: Vec<&FieldDef> = schema.fields.iter().filter(|f| f.kind.is_text()).collect();
    let (where_sql, like) = match q {
        Some(text) => {
            let mut terms = vec!["CAST(id AS TEXT) LIKE ?".to_string()];
            terms.extend(
                searchable
                    .iter()
                    .map(|f| format!("CAST(\"{}\" AS TEXT) LIKE ?", f.column)),
            );
            (
                format!(" WHERE ({})", terms.join(" OR ")),
                Some(format!("%{}%", text)),
            )
        }
        None => (String::new(), None),
    };
    let like_binds = 1 + searchable.len();

    let count_sql = format!("SELECT COUNT(*) FROM {}{}", schema.otype, where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(like) = &like {
        for _ in 0..like_binds {
            count_query = count_query.bind(like.clone());
        }
    }
    let total = count_query.fetch_one(pool).await?;

    let total_pages = (total + per_page - 1) / per_page;
    let page = page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * per_page;

    let rows_sql = format!(
        "SELECT * FROM {}{} ORDER BY id DESC LIMIT ? OFFSET ?",
        schema.otype, where_sql
    );
    let mut rows_query = sqlx::query(&rows_sql);
    if let Some(like) = &like {
        for _ in 0..like_binds {
            rows_query = rows_query.bind(like.clone());
        }
    }
    let rows = rows_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok(RecordPage {
        total,
        page,
        per_page,
        total_pages,
        records: rows.iter().map(|row| decode_record(schema, row)).collect(),
    })
}

/// Every column of every row, for exports. `gps_only` restricts to rows
/// with a usable coordinate pair.
pub async fn fetch_all_raw(
    pool: &SqlitePool,
    schema: &ObjectTypeSchema,
    gps_only: bool,
) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let where_sql = if gps_only {
        " WHERE gps_lat IS NOT NULL AND gps_lon IS NOT NULL"
    } else {
        ""
    };
    let sql = format!("SELECT * FROM {}{} ORDER BY id ASC", schema.otype, where_sql);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => crate::db::schema_sync::table_columns(pool, &schema.otype).await?,
    };

    let data = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| raw_column_value(row, i))
                .collect::<Vec<Value>>()
        })
        .collect();

    Ok((columns, data))
}

/// SQLite coerces freely between storage classes on read, so decode by the
/// stored value's own type rather than guessing
fn raw_column_value(row: &SqliteRow, index: usize) -> Value {
    use sqlx::{TypeInfo, ValueRef};
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    match raw.type_info().name() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .ok()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .ok()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn decode_record(schema: &ObjectTypeSchema, row: &SqliteRow) -> Record {
    let mut fields = BTreeMap::new();
    for field in &schema.fields {
        fields.insert(field.column.clone(), field_value(row, field));
    }

    Record {
        id: row.try_get("id").unwrap_or_default(),
        fields,
        meta_signature: get_text(row, "meta_signature"),
        files: FileLists {
            images: decode_list(row, "images_json"),
            thumbs: decode_list(row, "thumbs_json"),
            webps: decode_list(row, "webps_json"),
            sidecars: decode_list(row, "json_files_json"),
        },
        gps_lat: row.try_get("gps_lat").ok().flatten(),
        gps_lon: row.try_get("gps_lon").ok().flatten(),
        gps_alt: row.try_get("gps_alt").ok().flatten(),
        gps_acc: row.try_get("gps_acc").ok().flatten(),
        img_width: row.try_get("img_width").ok().flatten(),
        img_height: row.try_get("img_height").ok().flatten(),
        captured_at: get_text(row, "captured_at"),
        client_ip: get_text(row, "client_ip"),
        user_agent: get_text(row, "user_agent"),
        exif: get_text(row, "exif_json").and_then(|s| serde_json::from_str(&s).ok()),
        date_last_saved: get_text(row, "date_last_saved"),
    }
}

fn field_value(row: &SqliteRow, field: &FieldDef) -> Value {
    let column = field.column.as_str();
    match field.kind {
        FieldKind::Int => match row.try_get::<Option<i64>, _>(column) {
            Ok(v) => v.map(Value::from).unwrap_or(Value::Null),
            Err(_) => text_value(row, column),
        },
        FieldKind::Float => match row.try_get::<Option<f64>, _>(column) {
            Ok(v) => v
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .unwrap_or(Value::Null),
            Err(_) => text_value(row, column),
        },
        _ => text_value(row, column),
    }
}

fn text_value(row: &SqliteRow, column: &str) -> Value {
    get_text(row, column).map(Value::String).unwrap_or(Value::Null)
}

fn get_text(row: &SqliteRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column).ok().flatten()
}

fn decode_list(row: &SqliteRow, column: &str) -> Vec<String> {
    get_text(row, column)
        .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
}

fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

/// Best-effort content file removal: missing files are fine, anything else
/// is logged and swallowed. Names with path separators are refused since
/// list entries are always bare server-generated filenames.
fn remove_upload(upload_dir: &Path, name: &str) {
    if name.is_empty() {
        return;
    }
    if name.contains('/') || name.contains('\\') {
        warn!("refusing to delete suspicious filename {:?}", name);
        return;
    }
    let path = upload_dir.join(name);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not delete {}: {}", path.display(), e);
        }
    }
}
