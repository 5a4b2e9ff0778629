//! Content metadata: front matter parsing, value conversion and dates.
//!
//! Every metadata source (front matter, YAML content files, `config.toml`
//! layers) ends up as a [`Metadata`] map of JSON values. JSON is the common
//! denominator because it is also what the template engine consumes, so a
//! value read from front matter can be handed to a template unchanged.
//!
//! ## Front matter
//!
//! Markup files may start with a metadata block:
//!
//! ```text
//! ---                      +++
//! title: Hello             title = "Hello"
//! tags: [rust, web]        tags = ["rust", "web"]
//! ---                      +++
//! body...                  body...
//! ```
//!
//! `---` is parsed as YAML, `+++` as TOML. Files without a block have empty
//! metadata and their whole text as body.
//!
//! ## Dates
//!
//! Date strings are accepted as RFC 3339 (`2024-03-01T10:00:00+09:00`),
//! `YYYY-MM-DD HH:MM[:SS]` or `YYYY-MM-DD`. Naive dates are localized with
//! the configured `timezone` offset.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Metadata map of one content unit or config layer.
pub type Metadata = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("YAML front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML front matter: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("metadata must be a mapping, found {0}")]
    NotMapping(&'static str),
}

/// Front matter block syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontMatterFormat {
    Yaml,
    Toml,
}

impl FrontMatterFormat {
    fn delimiter(self) -> &'static str {
        match self {
            Self::Yaml => "---",
            Self::Toml => "+++",
        }
    }
}

/// Split text into `(format, front matter, body)`.
///
/// The opening delimiter must be the first line; the closing delimiter must
/// be on a line of its own. Returns `None` when there is no block.
pub fn split_front_matter(text: &str) -> Option<(FrontMatterFormat, &str, &str)> {
    let format = if text.starts_with("---") {
        FrontMatterFormat::Yaml
    } else if text.starts_with("+++") {
        FrontMatterFormat::Toml
    } else {
        return None;
    };
    let delimiter = format.delimiter();
    let first_line_end = text.find('\n')?;
    if text[..first_line_end].trim_end() != delimiter {
        return None;
    }
    let rest = &text[first_line_end + 1..];

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((format, front, body));
        }
        offset += line.len();
    }
    None
}

/// Parse optional front matter, returning metadata and the remaining body.
pub fn parse_front_matter(text: &str) -> Result<(Metadata, &str), MetadataError> {
    let Some((format, front, body)) = split_front_matter(text) else {
        return Ok((Metadata::new(), text));
    };
    let metadata = match format {
        FrontMatterFormat::Yaml => parse_yaml_mapping(front)?,
        FrontMatterFormat::Toml => {
            let table: toml::Table = toml::from_str(front)?;
            toml_table_to_metadata(table)
        }
    };
    Ok((metadata, body))
}

/// Parse a YAML document that must be a mapping (or empty).
pub fn parse_yaml_mapping(text: &str) -> Result<Metadata, MetadataError> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    match yaml_to_json(value) {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Null => Ok(Metadata::new()),
        other => Err(MetadataError::NotMapping(json_type_name(&other))),
    }
}

/// Convert a TOML table to metadata. Datetimes become their string form.
pub fn toml_table_to_metadata(table: toml::Table) -> Metadata {
    table
        .into_iter()
        .map(|(k, v)| (k, toml_to_json(v)))
        .collect()
}

pub fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Convert YAML to JSON. Non-string mapping keys are stringified; tagged
/// values drop their tag.
pub fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (value_to_string(&yaml_to_json(k)), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Display form of a scalar: strings unquoted, null empty, others as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Falsy values (`null`, `false`, `0`, `""`, `[]`, `{}`) contribute to no group.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parse a `timezone` setting: `UTC`, `Z`, `+09:00`, `-0500`, `+9`.
pub fn parse_timezone(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("gmt") || s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parse a date string, localizing naive forms with `tz`.
pub fn parse_date(s: &str, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return tz.from_local_datetime(&naive).single();
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // Front matter
    // =========================================================================

    #[test]
    fn yaml_front_matter() {
        let text = "---\ntitle: Hello\ntags: [a, b]\n---\nBody text\n";
        let (meta, body) = parse_front_matter(text).unwrap();
        assert_eq!(meta["title"], json!("Hello"));
        assert_eq!(meta["tags"], json!(["a", "b"]));
        assert_eq!(body, "Body text\n");
    }

    #[test]
    fn toml_front_matter_converts_datetime_to_string() {
        let text = "+++\ntitle = \"T\"\ndate = 2024-03-01\n+++\nBody";
        let (meta, body) = parse_front_matter(text).unwrap();
        assert_eq!(meta["title"], json!("T"));
        assert_eq!(meta["date"], json!("2024-03-01"));
        assert_eq!(body, "Body");
    }

    #[test]
    fn no_front_matter_keeps_whole_body() {
        let (meta, body) = parse_front_matter("# Title\n\ntext").unwrap();
        assert!(meta.is_empty());
        assert_eq!(body, "# Title\n\ntext");
    }

    #[test]
    fn horizontal_rule_is_not_front_matter() {
        // "----" on the first line is not the delimiter
        assert!(split_front_matter("----\ntext\n").is_none());
    }

    #[test]
    fn unterminated_front_matter_is_body() {
        let (meta, body) = parse_front_matter("---\ntitle: x\n").unwrap();
        assert!(meta.is_empty());
        assert_eq!(body, "---\ntitle: x\n");
    }

    #[test]
    fn yaml_scalar_document_is_rejected() {
        assert!(matches!(
            parse_yaml_mapping("just a string"),
            Err(MetadataError::NotMapping("a string"))
        ));
    }

    #[test]
    fn empty_yaml_is_empty_mapping() {
        assert!(parse_yaml_mapping("").unwrap().is_empty());
    }

    // =========================================================================
    // Values
    // =========================================================================

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(["a"])));
    }

    #[test]
    fn value_display() {
        assert_eq!(value_to_string(&json!("abc")), "abc");
        assert_eq!(value_to_string(&json!(12)), "12");
        assert_eq!(value_to_string(&json!(null)), "");
    }

    // =========================================================================
    // Dates
    // =========================================================================

    #[test]
    fn timezone_forms() {
        assert_eq!(parse_timezone("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_timezone("+09:00").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(parse_timezone("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_timezone("+9").unwrap().local_minus_utc(), 9 * 3600);
        assert!(parse_timezone("Asia/Tokyo").is_none());
    }

    #[test]
    fn naive_date_is_localized() {
        let tz = parse_timezone("+09:00").unwrap();
        let dt = parse_date("2024-03-01", &tz).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+09:00");
        let dt = parse_date("2024-03-01 10:30", &tz).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T10:30:00+09:00");
    }

    #[test]
    fn rfc3339_keeps_its_offset() {
        let tz = parse_timezone("UTC").unwrap();
        let dt = parse_date("2024-03-01T10:00:00-05:00", &tz).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn garbage_date_is_none() {
        let tz = parse_timezone("UTC").unwrap();
        assert!(parse_date("yesterday", &tz).is_none());
    }
}
