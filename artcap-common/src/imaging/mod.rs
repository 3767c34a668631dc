//! Derived image pipeline
//!
//! One uploaded photo becomes a family of content files: the resized main
//! JPEG, a bounded thumbnail, a best-effort WEBP rendition, and a JSON
//! sidecar. Filenames derive deterministically from the record's field
//! values, and the four per-record file lists stay index-parallel.
//!
//! The pipeline is split in two phases so callers can run the fallible,
//! side-effect-free part (decode, EXIF, the GPS gate) before any record is
//! resolved or created: `prepare_photo` then `attach_prepared`.

pub mod derive;
pub mod exif;
pub mod filename;

pub use exif::{ExifSummary, GpsFix};

use crate::config::CaptureSection;
use crate::db::{self, CaptureRow, FileLists, GpsColumns};
use crate::schema::ObjectTypeSchema;
use crate::sidecar;
use crate::time::TimeFormats;
use crate::{Error, Result};
use image::DynamicImage;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;

/// Request-scoped capture context recorded with each attached image
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A decoded, upright, bounded photo with its extracted metadata, ready to
/// attach to a record
#[derive(Debug, Clone)]
pub struct PreparedPhoto {
    main: DynamicImage,
    thumb: DynamicImage,
    summary: ExifSummary,
    gps: Option<GpsColumns>,
}

/// Decode and normalize an uploaded photo without touching storage.
///
/// Decode failures and a missing-but-required GPS fix reject the
/// submission here, before any record resolution runs; EXIF extraction
/// degrades gracefully.
pub fn prepare_photo(
    capture: &CaptureSection,
    photo: &[u8],
    client_gps: GpsColumns,
) -> Result<PreparedPhoto> {
    let exif_data = exif::read_exif(photo);
    let summary = exif_data
        .as_ref()
        .map(exif::summarize)
        .unwrap_or_default();
    let orientation = summary.orientation.unwrap_or(1);
    let exif_gps = exif_data.as_ref().and_then(exif::gps_fix);

    let gps = resolve_gps(capture, exif_gps, client_gps)?;

    let decoded = derive::decode(photo)?;
    let upright = derive::apply_orientation(decoded, orientation);
    // JPEG has no alpha channel; normalize once before encoding
    let upright = DynamicImage::ImageRgb8(upright.to_rgb8());
    let main = derive::bound_to(upright, capture.max_dim);
    let thumb = derive::bound_to(main.clone(), capture.thumb_dim);

    Ok(PreparedPhoto {
        main,
        thumb,
        summary,
        gps,
    })
}

/// Write the derivative files and sidecars for a prepared photo and append
/// them to the record's file lists. Returns the complete new lists.
#[allow(clippy::too_many_arguments)]
pub async fn attach_prepared(
    pool: &SqlitePool,
    capture: &CaptureSection,
    formats: &TimeFormats,
    upload_dir: &Path,
    schema: &ObjectTypeSchema,
    record_id: i64,
    prepared: &PreparedPhoto,
    ctx: &CaptureContext,
) -> Result<FileLists> {
    let record = db::get_record(pool, schema, record_id).await?;

    let index = record.files.len() + 1;
    let stem = filename::image_stem(
        &schema.filename_format,
        &template_fields(&record),
        &schema.otype,
        record.id,
        index,
    );

    std::fs::create_dir_all(upload_dir)?;

    let jpg_name = format!("{}.jpg", stem);
    let thumb_name = format!("{}.thumb.jpg", stem);
    let webp_name = format!("{}.webp", stem);
    let sidecar_name = format!("{}.json", stem);

    derive::write_jpeg(&prepared.main, &upload_dir.join(&jpg_name), capture.jpeg_quality)?;
    derive::write_jpeg(&prepared.thumb, &upload_dir.join(&thumb_name), 85)?;
    let webp_entry = if derive::write_webp(&prepared.main, &upload_dir.join(&webp_name)) {
        webp_name
    } else {
        // keep the four lists index-parallel even without a WEBP rendition
        String::new()
    };

    let mut files = record.files.clone();
    files.images.push(jpg_name.clone());
    files.thumbs.push(thumb_name.clone());
    files.webps.push(webp_entry);
    files.sidecars.push(sidecar_name.clone());

    let capture_row = CaptureRow {
        img_width: prepared.main.width() as i64,
        img_height: prepared.main.height() as i64,
        captured_at: prepared.summary.captured_at.clone(),
        client_ip: ctx.client_ip.clone(),
        user_agent: ctx.user_agent.clone(),
        exif_json: serde_json::to_string(&prepared.summary).ok(),
    };

    let doc = image_sidecar_doc(
        schema,
        &record,
        index,
        &jpg_name,
        &thumb_name,
        &files,
        prepared,
        ctx,
    );
    sidecar::write_image_sidecar(upload_dir, &sidecar_name, &doc)?;

    // per-record sidecar reflects the post-attach state
    let mut updated = record;
    updated.files = files.clone();
    updated.img_width = Some(capture_row.img_width);
    updated.img_height = Some(capture_row.img_height);
    updated.captured_at = capture_row.captured_at.clone();
    updated.client_ip = capture_row.client_ip.clone();
    updated.user_agent = capture_row.user_agent.clone();
    updated.exif = serde_json::to_value(&prepared.summary).ok();
    if let Some(fix) = prepared.gps {
        updated.gps_lat = fix.lat;
        updated.gps_lon = fix.lon;
        updated.gps_alt = fix.alt;
        updated.gps_acc = fix.acc;
    }
    sidecar::write_record_sidecar(upload_dir, &schema.otype, &updated)?;

    db::update_after_attach(
        pool,
        schema,
        record_id,
        &files,
        prepared.gps,
        &capture_row,
        formats,
    )
    .await?;

    Ok(files)
}

/// One-shot attach: prepare, then write and persist. Callers that need the
/// no-mutation-on-reject guarantee around record creation should call the
/// two phases themselves.
#[allow(clippy::too_many_arguments)]
pub async fn attach_image(
    pool: &SqlitePool,
    capture: &CaptureSection,
    formats: &TimeFormats,
    upload_dir: &Path,
    schema: &ObjectTypeSchema,
    record_id: i64,
    photo: &[u8],
    client_gps: GpsColumns,
    ctx: &CaptureContext,
) -> Result<FileLists> {
    let prepared = prepare_photo(capture, photo, client_gps)?;
    attach_prepared(
        pool, capture, formats, upload_dir, schema, record_id, &prepared, ctx,
    )
    .await
}

/// GPS precedence: EXIF first; client coordinates are the fallback pair
/// when capture is enabled. A required-but-absent fix rejects the
/// submission before any mutation.
fn resolve_gps(
    capture: &CaptureSection,
    exif_gps: Option<GpsFix>,
    client_gps: GpsColumns,
) -> Result<Option<GpsColumns>> {
    if let Some(fix) = exif_gps {
        return Ok(Some(GpsColumns {
            lat: Some(fix.lat),
            lon: Some(fix.lon),
            alt: fix.alt,
            acc: fix.acc,
        }));
    }
    if capture.gps_enabled && client_gps.has_fix() {
        return Ok(Some(client_gps));
    }
    if capture.gps_required {
        return Err(Error::Validation(
            "GPS coordinates are required but none were available from EXIF or the client"
                .to_string(),
        ));
    }
    Ok(None)
}

/// Stringified field values for filename template substitution.
/// `{record_id}` is always available.
fn template_fields(record: &db::Record) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = record
        .fields
        .iter()
        .map(|(column, value)| (column.clone(), value_to_template_string(value)))
        .collect();
    fields.insert("record_id".to_string(), record.id.to_string());
    fields
}

fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn image_sidecar_doc(
    schema: &ObjectTypeSchema,
    record: &db::Record,
    index: usize,
    jpg_name: &str,
    thumb_name: &str,
    files: &FileLists,
    prepared: &PreparedPhoto,
    ctx: &CaptureContext,
) -> Value {
    json!({
        "object_type": schema.otype,
        "record_id": record.id,
        "image_index": index,
        "image": jpg_name,
        "thumb": thumb_name,
        "exif": prepared.summary,
        "gps": prepared.gps.map(|g| json!({
            "lat": g.lat,
            "lon": g.lon,
            "alt": g.alt,
            "acc": g.acc,
        })),
        "client": {
            "ip": ctx.client_ip,
            "user_agent": ctx.user_agent,
        },
        "fields": record.fields,
        "files": files,
    })
}
