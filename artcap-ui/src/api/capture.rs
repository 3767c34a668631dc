//! Submission and existence-check endpoints
//!
//! `/api/submit` is the capture entry point: a multipart form carrying the
//! object type, an action mode, field values (repeated keys for
//! multi-select fields), optional photo bytes, and optional client GPS.
//! The required-field gate runs before any row is inserted or updated.

use crate::error::{ApiError, ApiResult};
use crate::session;
use crate::AppState;
use artcap_common::coerce::{coerce, FormValues};
use artcap_common::db::{self, FileLists, GpsColumns};
use artcap_common::imaging::{self, CaptureContext};
use artcap_common::matching;
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::header::{HeaderValue, SET_COOKIE, USER_AGENT};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: i64,
    pub created: bool,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<FileLists>,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
    pub id: Option<i64>,
}

/// POST /api/submit
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut form: FormValues = HashMap::new();
    let mut photo: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "photo" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("could not read photo: {}", e)))?;
            if !bytes.is_empty() {
                photo = Some(bytes);
            }
        } else if !name.is_empty() {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("could not read field {}: {}", name, e)))?;
            form.entry(name).or_default().push(text);
        }
    }

    let otype = first_value(&form, "object_type")
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let schema = state.config.schema(&otype)?;
    let action = first_value(&form, "action")
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();

    let client_gps = GpsColumns {
        lat: parse_f64(&form, "gps_lat"),
        lon: parse_f64(&form, "gps_lon"),
        alt: parse_f64(&form, "gps_alt"),
        acc: parse_f64(&form, "gps_acc"),
    };
    let ctx = CaptureContext {
        client_ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    let formats = state.config.time_formats();
    let values = coerce(schema, &form, false, &formats);
    matching::check_required(schema, &values).map_err(ApiError::from)?;

    let (token, issued) = match session::session_token(&headers) {
        Some(token) => (token, false),
        None => (session::new_token(), true),
    };

    let body = match action.as_str() {
        "" | "new" | "new_record" | "metadata" => {
            let id =
                matching::create_record(&state.db, schema, &values, client_gps, &formats).await?;
            state.sessions.set_current_record(&token, &otype, id);
            info!("created {} record {}", otype, id);
            SubmitResponse {
                id,
                created: true,
                action: "new",
                files: None,
            }
        }
        "update" | "update_record" => {
            let current = state.sessions.current_record(&token, &otype);
            match current {
                Some(id) => {
                    db::update_record(&state.db, schema, id, &values, client_gps, &formats)
                        .await?;
                    info!("updated {} record {}", otype, id);
                    SubmitResponse {
                        id,
                        created: false,
                        action: "update",
                        files: None,
                    }
                }
                None => {
                    let id =
                        matching::create_record(&state.db, schema, &values, client_gps, &formats)
                            .await?;
                    state.sessions.set_current_record(&token, &otype, id);
                    SubmitResponse {
                        id,
                        created: true,
                        action: "update",
                        files: None,
                    }
                }
            }
        }
        "add" | "add_image" => {
            let Some(photo) = photo else {
                return Err(ApiError::BadRequest("no image provided".to_string()));
            };
            // decode and the GPS gate run before any row is resolved or
            // created, so a rejected photo leaves the store untouched
            let prepared = imaging::prepare_photo(&state.config.capture, &photo, client_gps)?;

            let current = state.sessions.current_record(&token, &otype);
            let outcome = matching::resolve_record(
                &state.db, schema, &values, current, client_gps, &formats,
            )
            .await?;

            let files = imaging::attach_prepared(
                &state.db,
                &state.config.capture,
                &formats,
                &state.config.upload_dir,
                schema,
                outcome.record_id,
                &prepared,
                &ctx,
            )
            .await?;
            state
                .sessions
                .set_current_record(&token, &otype, outcome.record_id);
            info!(
                "attached image {} to {} record {}",
                files.images.len(),
                otype,
                outcome.record_id
            );
            SubmitResponse {
                id: outcome.record_id,
                created: outcome.created,
                action: "add_image",
                files: Some(files),
            }
        }
        other => {
            return Err(ApiError::BadRequest(format!("unknown action {:?}", other)));
        }
    };

    let mut response = Json(body).into_response();
    if issued {
        let cookie = session::session_cookie(&token);
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| ApiError::Internal("invalid session cookie".to_string()))?;
        response.headers_mut().insert(SET_COOKIE, value);
    }
    Ok(response)
}

/// POST /api/exists
///
/// Body is a flat JSON map of field values (string or array of strings)
/// plus `object_type`. Returns the newest matching record id, if any.
/// An unknown object type reports non-existence rather than erroring.
pub async fn exists(
    State(state): State<AppState>,
    Json(body): Json<HashMap<String, Value>>,
) -> ApiResult<Json<ExistsResponse>> {
    let otype = body
        .get("object_type")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let Ok(schema) = state.config.schema(&otype) else {
        return Ok(Json(ExistsResponse {
            exists: false,
            id: None,
        }));
    };

    let form = json_map_to_form(&body);
    let values = coerce(schema, &form, true, &state.config.time_formats());
    let id = db::exists_matching(&state.db, schema, &values).await?;

    Ok(Json(ExistsResponse {
        exists: id.is_some(),
        id,
    }))
}

/// Flatten a JSON field map into raw form values. Arrays become repeated
/// values (multi-select); scalars are stringified.
pub fn json_map_to_form(body: &HashMap<String, Value>) -> FormValues {
    let mut form = FormValues::new();
    for (key, value) in body {
        if key == "object_type" || key == "action" {
            continue;
        }
        match value {
            Value::String(s) => form.entry(key.clone()).or_default().push(s.clone()),
            Value::Array(items) => {
                let entry = form.entry(key.clone()).or_default();
                for item in items {
                    match item {
                        Value::String(s) => entry.push(s.clone()),
                        Value::Null => {}
                        other => entry.push(other.to_string()),
                    }
                }
            }
            Value::Null => {}
            other => form.entry(key.clone()).or_default().push(other.to_string()),
        }
    }
    form
}

fn first_value<'a>(form: &'a FormValues, key: &str) -> Option<&'a str> {
    form.get(key).and_then(|v| v.first()).map(String::as_str)
}

fn parse_f64(form: &FormValues, key: &str) -> Option<f64> {
    first_value(form, key).and_then(|s| s.trim().parse().ok())
}
