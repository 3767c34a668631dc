//! Image decoding and derivative generation
//!
//! Decode failures are fatal for the submission; the WEBP encode is the
//! only best-effort step.

use crate::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{imageops::FilterType, DynamicImage};
use std::io::BufWriter;
use std::path::Path;
use tracing::warn;

/// Decode an uploaded photo
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| Error::Image(format!("could not decode image: {}", e)))
}

/// Bake the EXIF orientation into the pixels so the stored image is always
/// upright. Unknown orientation values pass through unchanged.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Bound the longer edge to `max_dim`, preserving aspect ratio. Images
/// already within the bound are returned untouched (never upscales).
pub fn bound_to(img: DynamicImage, max_dim: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_dim {
        return img;
    }
    img.resize(max_dim, max_dim, FilterType::Lanczos3)
}

/// Write a JPEG at the given quality
pub fn write_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| Error::Image(format!("could not encode {}: {}", path.display(), e)))
}

/// Best-effort WEBP encode: a failure is logged and reported as false,
/// never propagated.
pub fn write_webp(img: &DynamicImage, path: &Path) -> bool {
    let result = (|| -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        let encoder = WebPEncoder::new_lossless(&mut writer);
        img.write_with_encoder(encoder)
            .map_err(|e| Error::Image(e.to_string()))
    })();

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("WEBP encode skipped for {}: {}", path.display(), e);
            // don't leave a partial file behind
            let _ = std::fs::remove_file(path);
            false
        }
    }
}
