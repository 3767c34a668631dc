//! Bulk export and import endpoints
//!
//! CSV carries every column with a header row and fully quoted values
//! (plus a BOM for spreadsheet friendliness); GeoJSON emits one Point
//! feature per record with a usable coordinate pair. Both are read-only
//! reflections of stored state. CSV import is lenient: DATE fields are
//! re-parsed and invalid dates cleared and reported, never rejected.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use artcap_common::coerce::{parse_user_date, CoercedValues};
use artcap_common::db::{self, GpsColumns};
use artcap_common::schema::FieldKind;
use artcap_common::signature::meta_signature;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

const GPS_COLUMNS: &[&str] = &["gps_lat", "gps_lon", "gps_alt", "gps_acc"];

/// GET /api/export/csv/:otype
pub async fn export_csv(
    State(state): State<AppState>,
    Path(otype): Path<String>,
) -> ApiResult<Response> {
    let schema = state.config.schema(&otype)?;
    let (columns, rows) = db::fetch_all_raw(&state.db, schema, false).await?;

    // BOM keeps spreadsheet tools happy with UTF-8
    let mut out = String::from("\u{feff}");
    out.push_str(
        &columns
            .iter()
            .map(|c| csv_quote(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');
    for row in &rows {
        let line = row
            .iter()
            .map(|v| csv_quote(&csv_value(v)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", schema.otype),
            ),
        ],
        out,
    )
        .into_response())
}

/// GET /api/export/geojson/:otype
pub async fn export_geojson(
    State(state): State<AppState>,
    Path(otype): Path<String>,
) -> ApiResult<Response> {
    let schema = state.config.schema(&otype)?;
    let (columns, rows) = db::fetch_all_raw(&state.db, schema, true).await?;

    let lat_idx = columns.iter().position(|c| c == "gps_lat");
    let lon_idx = columns.iter().position(|c| c == "gps_lon");

    let mut features = Vec::new();
    for row in &rows {
        let (Some(lat), Some(lon)) = (
            lat_idx.and_then(|i| row.get(i)).and_then(Value::as_f64),
            lon_idx.and_then(|i| row.get(i)).and_then(Value::as_f64),
        ) else {
            continue;
        };

        let mut properties = serde_json::Map::new();
        for (column, value) in columns.iter().zip(row) {
            if GPS_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            properties.insert(column.clone(), value.clone());
        }

        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [lon, lat] },
            "properties": properties,
        }));
    }

    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    Ok((
        [
            (CONTENT_TYPE, "application/geo+json".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.geojson\"", schema.otype),
            ),
        ],
        collection.to_string(),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    /// (csv line number, column, raw value) of dates that were cleared
    pub cleared_dates: Vec<(usize, String, String)>,
}

/// POST /api/import/csv/:otype
pub async fn import_csv(
    State(state): State<AppState>,
    Path(otype): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<ImportResponse>> {
    let schema = state.config.schema(&otype)?;
    let formats = state.config.time_formats();

    let mut csv_text: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("csv_file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("could not read CSV: {}", e)))?;
            csv_text = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    let csv_text = csv_text.ok_or_else(|| ApiError::BadRequest("no CSV selected".to_string()))?;

    let mut rows = parse_csv(csv_text.trim_start_matches('\u{feff}'));
    if rows.is_empty() {
        return Ok(Json(ImportResponse {
            imported: 0,
            cleared_dates: Vec::new(),
        }));
    }
    let header = rows.remove(0);

    let mut imported = 0;
    let mut cleared_dates = Vec::new();

    for (line, row) in rows.iter().enumerate() {
        let csv_line = line + 2; // header is line 1
        let mut values = CoercedValues::new();
        let mut gps = GpsColumns::default();

        for (column, raw) in header.iter().zip(row) {
            let trimmed = raw.trim();
            if let Some(slot) = gps_slot(&mut gps, column) {
                *slot = trimmed.parse().ok();
                continue;
            }
            let Some(field) = schema.field(column) else {
                continue;
            };
            if trimmed.is_empty() {
                values.insert(field.column.clone(), Value::Null);
                continue;
            }
            let value = match field.kind {
                FieldKind::Date => match parse_user_date(trimmed) {
                    Some(date) => Value::String(date.format(&formats.date).to_string()),
                    None => {
                        cleared_dates.push((csv_line, column.clone(), trimmed.to_string()));
                        Value::Null
                    }
                },
                FieldKind::Int => trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                FieldKind::Float => trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                    .unwrap_or(Value::Null),
                _ => Value::String(trimmed.to_string()),
            };
            values.insert(field.column.clone(), value);
        }

        if values.is_empty() {
            continue;
        }
        let signature = meta_signature(schema, &values);
        db::insert_record(&state.db, schema, &values, &signature, gps, &formats).await?;
        imported += 1;
    }

    info!(
        "imported {} row(s) into {} ({} date value(s) cleared)",
        imported,
        otype,
        cleared_dates.len()
    );

    Ok(Json(ImportResponse {
        imported,
        cleared_dates,
    }))
}

fn gps_slot<'a>(gps: &'a mut GpsColumns, column: &str) -> Option<&'a mut Option<f64>> {
    match column {
        "gps_lat" => Some(&mut gps.lat),
        "gps_lon" => Some(&mut gps.lon),
        "gps_alt" => Some(&mut gps.alt),
        "gps_acc" => Some(&mut gps.acc),
        _ => None,
    }
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Minimal RFC 4180 parsing: quoted fields, doubled-quote escapes,
/// CRLF or LF line endings.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    // drop fully empty trailing rows
    rows.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    rows
}
