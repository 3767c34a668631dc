//! EXIF metadata and GPS extraction
//!
//! Every extraction here is best-effort: missing or malformed EXIF data
//! degrades to `None` and never aborts an upload.

use crate::time::TIMESTAMP_FORMAT;
use chrono::NaiveDateTime;
use exif::{Exif, In, Tag, Value as ExifValue};
use serde::Serialize;

/// A resolved coordinate fix. Accuracy is only known for client-supplied
/// fixes; EXIF carries none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub acc: Option<f64>,
}

/// Compact EXIF summary persisted per record and into sidecars
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExifSummary {
    pub captured_at: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub orientation: Option<u32>,
}

/// Parse the EXIF container out of raw photo bytes, if any
pub fn read_exif(bytes: &[u8]) -> Option<Exif> {
    exif::Reader::new()
        .read_from_container(&mut std::io::Cursor::new(bytes))
        .ok()
}

/// Capture datetime, camera make/model, and orientation
pub fn summarize(exif: &Exif) -> ExifSummary {
    ExifSummary {
        captured_at: capture_datetime(exif),
        camera_make: ascii_field(exif, Tag::Make),
        camera_model: ascii_field(exif, Tag::Model),
        orientation: Some(orientation(exif)),
    }
}

/// EXIF orientation value, defaulting to 1 (upright)
pub fn orientation(exif: &Exif) -> u32 {
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// GPS coordinates from degree-minute-second rationals, signed per
/// hemisphere reference. None unless both latitude and longitude decode.
pub fn gps_fix(exif: &Exif) -> Option<GpsFix> {
    let lat = dms_field(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S')?;
    let lon = dms_field(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W')?;
    let alt = rational_field(exif, Tag::GPSAltitude);
    Some(GpsFix {
        lat,
        lon,
        alt,
        acc: None,
    })
}

fn dms_field(exif: &Exif, tag: Tag, ref_tag: Tag, negative_ref: char) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let ExifValue::Rational(parts) = &field.value else {
        return None;
    };
    if parts.len() < 3 {
        return None;
    }
    let negative = ascii_field_raw(exif, ref_tag)
        .map(|r| r.starts_with(negative_ref))
        .unwrap_or(false);
    let degrees = dms_to_degrees(
        parts[0].to_f64(),
        parts[1].to_f64(),
        parts[2].to_f64(),
        negative,
    );
    degrees.is_finite().then_some(degrees)
}

/// Convert degree/minute/second components to decimal degrees
pub fn dms_to_degrees(d: f64, m: f64, s: f64, negative: bool) -> f64 {
    let degrees = d + m / 60.0 + s / 3600.0;
    if negative {
        -degrees
    } else {
        degrees
    }
}

fn rational_field(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let ExifValue::Rational(parts) = &field.value else {
        return None;
    };
    let value = parts.first()?.to_f64();
    value.is_finite().then_some(value)
}

fn ascii_field_raw(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let ExifValue::Ascii(groups) = &field.value else {
        return None;
    };
    let text = String::from_utf8_lossy(groups.first()?);
    let trimmed = text.trim().trim_matches('\0').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    ascii_field_raw(exif, tag)
}

/// EXIF datetimes come as `YYYY:MM:DD HH:MM:SS`; normalize to the storage
/// timestamp format, passing unrecognized strings through unchanged.
fn capture_datetime(exif: &Exif) -> Option<String> {
    let raw = ascii_field_raw(exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_field_raw(exif, Tag::DateTime))?;
    match NaiveDateTime::parse_from_str(&raw, "%Y:%m:%d %H:%M:%S") {
        Ok(dt) => Some(dt.format(TIMESTAMP_FORMAT).to_string()),
        Err(_) => Some(raw),
    }
}
