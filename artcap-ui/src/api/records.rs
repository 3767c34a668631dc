//! Record browsing, editing, and deletion endpoints

use crate::api::capture::json_map_to_form;
use crate::error::ApiResult;
use crate::AppState;
use artcap_common::coerce::coerce;
use artcap_common::db::{self, GpsColumns, Record, RecordPage};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

/// Offered page sizes; anything else falls back to the default
const PER_PAGE_CHOICES: &[i64] = &[10, 25, 50, 100, 300];
const DEFAULT_PER_PAGE: i64 = 25;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Free-text filter, matched as a substring across user fields and id
    pub q: Option<String>,

    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    DEFAULT_PER_PAGE
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub otype: String,
    pub label: String,
    #[serde(flatten)]
    pub page: RecordPage,
}

/// GET /api/records/:otype
pub async fn list(
    State(state): State<AppState>,
    Path(otype): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let schema = state.config.schema(&otype)?;

    let per_page = if PER_PAGE_CHOICES.contains(&query.per_page) {
        query.per_page
    } else {
        DEFAULT_PER_PAGE
    };

    let page = db::list_records(
        &state.db,
        schema,
        query.q.as_deref(),
        query.page,
        per_page,
    )
    .await?;

    Ok(Json(ListResponse {
        otype: schema.otype.clone(),
        label: schema.label.clone(),
        page,
    }))
}

/// GET /api/records/:otype/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path((otype, id)): Path<(String, i64)>,
) -> ApiResult<Json<Record>> {
    let schema = state.config.schema(&otype)?;
    let record = db::get_record(&state.db, schema, id).await?;
    Ok(Json(record))
}

/// POST /api/records/:otype/:id
///
/// Partial edit: only submitted fields change; server-managed columns are
/// never client-settable.
pub async fn edit(
    State(state): State<AppState>,
    Path((otype, id)): Path<(String, i64)>,
    Json(body): Json<HashMap<String, Value>>,
) -> ApiResult<Json<Record>> {
    let schema = state.config.schema(&otype)?;
    let formats = state.config.time_formats();

    let form = json_map_to_form(&body);
    let values = coerce(schema, &form, true, &formats);
    db::update_record(&state.db, schema, id, &values, GpsColumns::default(), &formats).await?;
    info!("edited {} record {}", otype, id);

    let record = db::get_record(&state.db, schema, id).await?;
    Ok(Json(record))
}

/// POST /api/records/:otype/:id/delete
pub async fn delete(
    State(state): State<AppState>,
    Path((otype, id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    let schema = state.config.schema(&otype)?;
    db::delete_record(&state.db, schema, &state.config.upload_dir, id).await?;
    info!("deleted {} record {}", otype, id);
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// POST /api/records/:otype/:id/images/:idx/delete
pub async fn delete_image(
    State(state): State<AppState>,
    Path((otype, id, idx)): Path<(String, i64, usize)>,
) -> ApiResult<Json<Value>> {
    let schema = state.config.schema(&otype)?;
    db::delete_image(
        &state.db,
        schema,
        &state.config.upload_dir,
        id,
        idx,
        &state.config.time_formats(),
    )
    .await?;
    info!("detached image {} from {} record {}", idx, otype, id);
    Ok(Json(serde_json::json!({ "ok": true })))
}
