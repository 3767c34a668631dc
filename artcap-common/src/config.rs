//! Configuration loading and resolution
//!
//! Settings resolve in priority order: command-line argument, `ARTCAP_*`
//! environment variable, TOML config file, compiled default. The object
//! type catalog comes from the config file only and is validated fail-fast
//! at startup; the process must not serve requests with an invalid schema.

use crate::schema::ObjectTypeSchema;
use crate::time::{TimeFormats, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Branding and format settings from the `[app]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub brand: String,
    pub subtitle: String,
    pub admin_label: String,
    pub date_format: String,
    pub timestamp_format: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            brand: "Artifact Capture".to_string(),
            subtitle: String::new(),
            admin_label: "Admin".to_string(),
            date_format: DATE_FORMAT.to_string(),
            timestamp_format: TIMESTAMP_FORMAT.to_string(),
        }
    }
}

/// Image pipeline and GPS settings from the `[capture]` table
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Longest-edge bound for the stored main image (never upscales)
    pub max_dim: u32,
    /// Longest-edge bound for thumbnails
    pub thumb_dim: u32,
    pub jpeg_quality: u8,
    /// Accepted for config compatibility; the WEBP encoder in use is
    /// lossless, so this only applies when a lossy encoder is available.
    pub webp_quality: u8,
    /// Accept client-supplied coordinates as a fallback when EXIF has none
    pub gps_enabled: bool,
    /// Reject image submissions that carry no coordinates from any source
    pub gps_required: bool,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            max_dim: 3000,
            thumb_dim: 400,
            jpeg_quality: 92,
            webp_quality: 85,
            gps_enabled: false,
            gps_required: false,
        }
    }
}

/// Optional path overrides from the `[paths]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub upload_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

/// One object type as written in the config file, before normalization
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectTypeConfig {
    pub label: Option<String>,
    #[serde(default)]
    pub filename_format: String,
    /// Ordered field tuples: [label, column, type] or
    /// [label, column, type, widget-spec-or-constant]
    pub input_fields: Vec<Vec<String>>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Columns offered for grouped browsing (display hint only)
    #[serde(default)]
    pub index_fields: Vec<String>,
}

/// Raw config file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    app: AppSection,
    capture: CaptureSection,
    paths: PathsSection,
    object_types: BTreeMap<String, ObjectTypeConfig>,
}

/// Fully resolved application configuration
#[derive(Debug, Clone)]
pub struct ArtcapConfig {
    pub app: AppSection,
    pub capture: CaptureSection,
    pub upload_dir: PathBuf,
    pub db_path: PathBuf,
    /// Normalized schema per object type, keyed by type identifier
    pub schemas: BTreeMap<String, ObjectTypeSchema>,
}

impl ArtcapConfig {
    /// Load and validate configuration.
    ///
    /// `cli_config` / `cli_root` come from command-line arguments and take
    /// priority over `ARTCAP_CONFIG` / `ARTCAP_ROOT` environment variables.
    pub fn load(cli_config: Option<&str>, cli_root: Option<&str>) -> Result<Self> {
        let config_path = resolve_path(cli_config, "ARTCAP_CONFIG", "artcap.toml");
        let raw = load_raw(&config_path)?;
        Self::from_raw(raw, cli_root)
    }

    /// Build a resolved config from an already-parsed TOML string.
    ///
    /// Used by tests and embedded callers; `load` is the normal entry point.
    pub fn from_toml_str(toml_text: &str, root: Option<&str>) -> Result<Self> {
        let raw: RawConfig = toml::from_str(toml_text)
            .map_err(|e| Error::Config(format!("could not parse config: {}", e)))?;
        Self::from_raw(raw, root)
    }

    fn from_raw(mut raw: RawConfig, cli_root: Option<&str>) -> Result<Self> {
        if raw.object_types.is_empty() {
            return Err(Error::Config(
                "config must define at least one [object_types.*] table".to_string(),
            ));
        }

        apply_capture_env(&mut raw.capture);

        let root = resolve_path(cli_root, "ARTCAP_ROOT", "artcap_data");
        let upload_dir = match std::env::var("ARTCAP_UPLOAD_DIR") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => raw
                .paths
                .upload_dir
                .clone()
                .unwrap_or_else(|| root.join("uploads")),
        };
        let db_path = match std::env::var("ARTCAP_DB_PATH") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => raw
                .paths
                .db_path
                .clone()
                .unwrap_or_else(|| root.join("data").join("artcap.db")),
        };

        let mut schemas = BTreeMap::new();
        for (otype, cfg) in &raw.object_types {
            schemas.insert(otype.clone(), ObjectTypeSchema::normalize(otype, cfg)?);
        }

        info!(
            "Loaded configuration: {} object type(s), upload dir {}",
            schemas.len(),
            upload_dir.display()
        );

        Ok(Self {
            app: raw.app,
            capture: raw.capture,
            upload_dir,
            db_path,
            schemas,
        })
    }

    /// Storage formats for the coercer
    pub fn time_formats(&self) -> TimeFormats {
        TimeFormats {
            date: self.app.date_format.clone(),
            timestamp: self.app.timestamp_format.clone(),
        }
    }

    /// Look up a schema, or fail with `NotFound`
    pub fn schema(&self, otype: &str) -> Result<&ObjectTypeSchema> {
        self.schemas
            .get(otype)
            .ok_or_else(|| Error::NotFound(format!("unknown object type '{}'", otype)))
    }
}

fn resolve_path(cli_arg: Option<&str>, env_var: &str, default: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(env_var) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(default)
}

fn load_raw(path: &Path) -> Result<RawConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("could not read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&text).map_err(|e| {
        Error::Config(format!("could not parse config file {}: {}", path.display(), e))
    })
}

/// Environment overrides for the capture section
fn apply_capture_env(capture: &mut CaptureSection) {
    if let Some(v) = env_parse::<u32>("ARTCAP_MAX_DIM") {
        capture.max_dim = v;
    }
    if let Some(v) = env_parse::<u32>("ARTCAP_THUMB_DIM") {
        capture.thumb_dim = v;
    }
    if let Some(v) = env_parse::<u8>("ARTCAP_JPEG_QUALITY") {
        capture.jpeg_quality = v;
    }
    if let Some(v) = env_parse::<u8>("ARTCAP_WEBP_QUALITY") {
        capture.webp_quality = v;
    }
    if let Some(v) = env_bool("ARTCAP_GPS_ENABLED") {
        capture.gps_enabled = v;
    }
    if let Some(v) = env_bool("ARTCAP_GPS_REQUIRED") {
        capture.gps_required = v;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    Some(matches!(trimmed.as_str(), "1" | "true" | "yes" | "y" | "on"))
}
