//! Deterministic content filenames from record field values
//!
//! Filenames are rendered from a per-object-type template with named
//! `{column}` placeholders. Placeholder values are slugged so no field
//! value can produce a path that escapes the content directory; unknown
//! placeholders render as empty rather than erroring.

use std::collections::BTreeMap;

/// Filesystem-safe slug: anything outside ASCII alphanumerics, `-` and `_`
/// becomes `_`, runs of `_` collapse, leading/trailing `_` are trimmed.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_underscore = false;
    for c in value.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

/// Substitute `{name}` placeholders with slugged field values. Literal text
/// outside placeholders passes through; an unclosed `{` is kept literally.
pub fn render_filename(template: &str, fields: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices();
    while let Some((start, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        match template[start + 1..].find('}') {
            Some(len) => {
                let name = &template[start + 1..start + 1 + len];
                if let Some(value) = fields.get(name) {
                    out.push_str(&slugify(value));
                }
                // skip past the placeholder body and closing brace
                for _ in 0..=len {
                    chars.next();
                }
            }
            None => out.push('{'),
        }
    }
    out
}

/// Stem for one attached image: rendered template plus the per-record image
/// index suffix, so repeated images on one record never collide. An empty
/// render falls back to `{otype}_{id}`.
pub fn image_stem(
    template: &str,
    fields: &BTreeMap<String, String>,
    otype: &str,
    record_id: i64,
    image_index: usize,
) -> String {
    let base = render_filename(template, fields);
    let base = if base.is_empty() {
        format!("{}_{}", otype, record_id)
    } else {
        base
    };
    format!("{}_IMG{}", base, image_index)
}
