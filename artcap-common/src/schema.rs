//! Object type schema normalization
//!
//! Turns the declarative object type configuration into a validated field
//! catalog used by the coercer, the matching engine, and the record store.
//! Normalization runs once at startup; any error here aborts the process
//! before it serves requests.

use crate::config::ObjectTypeConfig;
use crate::{Error, Result};

/// Declared field kind, parsed from the configuration type string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    Float,
    Date,
    Timestamp,
    /// Fixed server-side value, never editable by the client
    Constant,
    /// Stored as TEXT, upper-cased on coercion
    Uppercase,
}

impl FieldKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "TEXT" => Ok(FieldKind::Text),
            "INT" | "INTEGER" => Ok(FieldKind::Int),
            "FLOAT" | "REAL" => Ok(FieldKind::Float),
            "DATE" => Ok(FieldKind::Date),
            "TIMESTAMP" => Ok(FieldKind::Timestamp),
            "CONSTANT" => Ok(FieldKind::Constant),
            "UPPERCASE" => Ok(FieldKind::Uppercase),
            _ => Err(Error::Config(format!("unknown field type {:?}", raw))),
        }
    }

    /// SQLite column type for this kind
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Int => "INTEGER",
            FieldKind::Float => "REAL",
            _ => "TEXT",
        }
    }

    /// Timestamp-family kinds are excluded from record-matching signatures
    pub fn is_timestamp_family(self) -> bool {
        matches!(self, FieldKind::Timestamp)
    }

    /// Text-affinity kinds participate in free-text search
    pub fn is_text(self) -> bool {
        matches!(
            self,
            FieldKind::Text | FieldKind::Date | FieldKind::Constant | FieldKind::Uppercase
        )
    }
}

/// Input widget resolved for a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Widget {
    Text,
    Dropdown(Vec<String>),
    /// Multi-select; coerced values are JSON array strings
    Radio(Vec<String>),
    Constant,
    Uppercase,
}

/// One normalized field of an object type
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub label: String,
    pub column: String,
    pub kind: FieldKind,
    pub widget: Widget,
    pub constant_value: Option<String>,
    /// Value is computed server-side at save time; client input is discarded
    pub server_managed: bool,
    /// Server-managed field that is re-stamped on every update
    pub bump_on_update: bool,
    pub required: bool,
}

impl FieldDef {
    pub fn is_multi_select(&self) -> bool {
        matches!(self.widget, Widget::Radio(_))
    }
}

/// Columns present in every record table regardless of object type.
/// User fields may not use these names, and `required_fields` may not
/// reference them.
pub const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "meta_signature",
    "gps_lat",
    "gps_lon",
    "gps_alt",
    "gps_acc",
    "images_json",
    "thumbs_json",
    "webps_json",
    "json_files_json",
    "img_width",
    "img_height",
    "captured_at",
    "client_ip",
    "user_agent",
    "exif_json",
    "date_last_saved",
];

pub fn is_system_column(column: &str) -> bool {
    SYSTEM_COLUMNS.iter().any(|c| *c == column)
}

/// Validated field catalog for one object type
#[derive(Debug, Clone)]
pub struct ObjectTypeSchema {
    /// Type identifier; also the table name
    pub otype: String,
    pub label: String,
    /// Filename template with `{column}` placeholders
    pub filename_format: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
    pub index_fields: Vec<String>,
}

impl ObjectTypeSchema {
    /// Normalize one raw object type definition. Pure and deterministic;
    /// called once at startup per object type.
    pub fn normalize(otype: &str, cfg: &ObjectTypeConfig) -> Result<Self> {
        if !is_valid_identifier(otype) {
            return Err(Error::Config(format!(
                "object type name {:?} is not a valid identifier",
                otype
            )));
        }
        if cfg.input_fields.is_empty() {
            return Err(Error::Config(format!(
                "object type '{}' has no input fields",
                otype
            )));
        }

        let mut fields: Vec<FieldDef> = Vec::with_capacity(cfg.input_fields.len());
        for raw in &cfg.input_fields {
            let field = normalize_field(otype, raw)?;
            if fields.iter().any(|f| f.column == field.column) {
                return Err(Error::Config(format!(
                    "object type '{}' declares column '{}' twice",
                    otype, field.column
                )));
            }
            fields.push(field);
        }

        for required in &cfg.required_fields {
            if is_system_column(required) {
                return Err(Error::Config(format!(
                    "object type '{}': required field '{}' is a reserved system column",
                    otype, required
                )));
            }
            match fields.iter_mut().find(|f| &f.column == required) {
                Some(field) => field.required = true,
                None => {
                    return Err(Error::Config(format!(
                        "object type '{}': required field '{}' is not declared",
                        otype, required
                    )))
                }
            }
        }

        let label = cfg
            .label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| title_case(otype));

        Ok(Self {
            otype: otype.to_string(),
            label,
            filename_format: cfg.filename_format.clone(),
            fields,
            index_fields: cfg
                .index_fields
                .iter()
                .filter(|c| cfg.input_fields.iter().any(|f| f.get(1) == Some(*c)))
                .cloned()
                .collect(),
        })
    }

    pub fn field(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column == column)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.column.as_str())
    }
}

fn normalize_field(otype: &str, raw: &[String]) -> Result<FieldDef> {
    if raw.len() < 2 || raw.len() > 4 {
        return Err(Error::Config(format!(
            "object type '{}': field tuple {:?} must have 2-4 elements",
            otype, raw
        )));
    }
    let label = raw[0].clone();
    let column = raw[1].clone();
    if !is_valid_identifier(&column) {
        return Err(Error::Config(format!(
            "object type '{}': column name {:?} is not a valid identifier",
            otype, column
        )));
    }
    if is_system_column(&column) {
        return Err(Error::Config(format!(
            "object type '{}': column '{}' is reserved",
            otype, column
        )));
    }

    let kind = FieldKind::parse(raw.get(2).map(String::as_str).unwrap_or("TEXT"))?;

    let (widget, constant_value) = match kind {
        FieldKind::Constant => {
            // 4th tuple element is the constant value, not a widget spec
            (Widget::Constant, Some(raw.get(3).cloned().unwrap_or_default()))
        }
        FieldKind::Uppercase => (Widget::Uppercase, None),
        _ => (
            parse_widget_spec(raw.get(3).map(String::as_str).unwrap_or(""))
                .map_err(|e| Error::Config(format!("field '{}.{}': {}", otype, column, e)))?,
            None,
        ),
    };

    // Server-managed marker columns: a recorded/updated column declared with
    // a timestamp-family type is stamped by the server, never by the client.
    let timestamp_declared = kind.is_timestamp_family();
    let lower = column.to_ascii_lowercase();
    let server_managed = timestamp_declared && (lower == "date_recorded" || lower == "date_updated");
    let bump_on_update = server_managed && lower == "date_updated";

    Ok(FieldDef {
        label,
        column,
        kind,
        widget,
        constant_value,
        server_managed,
        bump_on_update,
        required: false,
    })
}

/// Parse a widget spec string: empty for a plain text input, or
/// `DROPDOWN('a','b',...)` / `RADIO('a','b',...)`. Anything else is a
/// configuration error naming the offending spec.
fn parse_widget_spec(raw: &str) -> Result<Widget> {
    let spec = raw.trim();
    if spec.is_empty() {
        return Ok(Widget::Text);
    }

    let upper = spec.to_ascii_uppercase();
    let (token, multi) = if upper.starts_with("DROPDOWN") {
        ("DROPDOWN", false)
    } else if upper.starts_with("RADIO") {
        ("RADIO", true)
    } else {
        return Err(Error::Config(format!(
            "could not parse widget spec {:?}",
            raw
        )));
    };

    let rest = spec[token.len()..].trim();
    let options = parse_option_list(rest)
        .ok_or_else(|| Error::Config(format!("could not parse widget spec {:?}", raw)))?;
    if options.is_empty() {
        return Err(Error::Config(format!(
            "widget spec {:?} has an empty option list",
            raw
        )));
    }

    Ok(if multi {
        Widget::Radio(options)
    } else {
        Widget::Dropdown(options)
    })
}

/// Parse a parenthesized, quoted option list: `('a', 'b', "c")`
fn parse_option_list(raw: &str) -> Option<Vec<String>> {
    let inner = raw.strip_prefix('(')?.strip_suffix(')')?;
    let mut options = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        let quote = match chars.next() {
            Some(c @ ('\'' | '"')) => c,
            Some(_) => return None,
            None => break,
        };
        let mut value = String::new();
        loop {
            match chars.next() {
                Some(c) if c == quote => break,
                Some(c) => value.push(c),
                None => return None, // unterminated quote
            }
        }
        options.push(value);
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some(',') => continue,
            Some(_) => return None,
            None => break,
        }
    }
    Some(options)
}

/// Table and column names: ASCII alphanumerics and underscore only, since
/// they are interpolated into SQL
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() < 100
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().map_or(false, |c| c.is_ascii_digit())
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
