//! JSON sidecar files
//!
//! Each attached image gets its own sidecar capturing the record state at
//! that moment; additionally one per-record sidecar is overwritten on every
//! attach to reflect the record's current full state. All sidecars live in
//! the flat content directory next to the images they describe.

use crate::db::Record;
use crate::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Name of the per-record sidecar, overwritten on every attach
pub fn record_sidecar_name(otype: &str, id: i64) -> String {
    format!("{}_{}.record.json", otype, id)
}

/// Write one per-image sidecar document
pub fn write_image_sidecar(upload_dir: &Path, name: &str, doc: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(doc)
        .map_err(|e| Error::Internal(format!("could not serialize sidecar: {}", e)))?;
    std::fs::write(upload_dir.join(name), text)?;
    Ok(())
}

/// Overwrite the per-record sidecar with the record's current state.
/// Returns the sidecar filename.
pub fn write_record_sidecar(upload_dir: &Path, otype: &str, record: &Record) -> Result<String> {
    let name = record_sidecar_name(otype, record.id);
    let doc = serde_json::to_value(record)
        .map_err(|e| Error::Internal(format!("could not serialize record: {}", e)))?;
    let text = serde_json::to_string_pretty(&doc)
        .map_err(|e| Error::Internal(format!("could not serialize record: {}", e)))?;
    std::fs::write(upload_dir.join(&name), text)?;
    Ok(name)
}
