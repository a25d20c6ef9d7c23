//! Field-merge policy: a later, more specific source overwrites a field only
//! with a non-empty value, and nothing is ever deleted or synthesized.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use smartadmit_shared::{AcademicLevel, ExamEntry, FieldValue, Profile, ProfileField};

/// Overlay `secondary` onto `primary`. Returns the fields that changed.
///
/// Side fields (`raw_input_text`, `lor_text`, `user_feedback`) are not
/// touched; they belong to the intake and refinement steps.
pub fn merge_profiles(primary: &mut Profile, secondary: &Profile) -> Vec<ProfileField> {
    let mut changed = Vec::new();
    for (field, value) in &secondary.fields {
        if value.is_empty() {
            continue;
        }
        if primary.fields.get(field) != Some(value) {
            primary.fields.insert(*field, value.clone());
            changed.push(*field);
        }
    }
    debug!(changed = changed.len(), "merged profile fields");
    changed
}

/// Convert a model-produced JSON record into profile fields.
///
/// Unknown keys and null-like values are dropped. Numbers become text.
/// A location string is split into a list. An academic level outside the
/// enumeration is treated as not supplied.
pub fn profile_from_record(record: &Map<String, Value>) -> Profile {
    let mut profile = Profile::default();

    for (key, value) in record {
        let Ok(field) = key.parse::<ProfileField>() else {
            debug!(key, "ignoring unrecognized field");
            continue;
        };
        if let Some(converted) = convert_value(field, value) {
            profile.set(field, converted);
        }
    }

    profile
}

fn convert_value(field: ProfileField, value: &Value) -> Option<FieldValue> {
    match field {
        ProfileField::PreferredLocations => match value {
            Value::String(_) => scalar_text(value).map(|s| FieldValue::List(split_locations(&s))),
            Value::Array(items) => Some(FieldValue::List(
                items.iter().filter_map(scalar_text).collect(),
            )),
            _ => None,
        },
        ProfileField::CompetitiveExams => match value {
            Value::Array(items) => Some(FieldValue::Exams(
                items.iter().filter_map(exam_entry).collect(),
            )),
            Value::String(_) => scalar_text(value).map(|name| {
                FieldValue::Exams(vec![ExamEntry {
                    exam_name: name,
                    details: String::new(),
                }])
            }),
            _ => None,
        },
        ProfileField::AcademicLevel | ProfileField::IntendedDegreeLevel => {
            let text = scalar_text(value)?;
            match AcademicLevel::parse(&text) {
                Some(level) => Some(FieldValue::Text(level.as_str().to_string())),
                None => {
                    warn!(field = %field, value = %text, "value outside academic level set, ignoring");
                    None
                }
            }
        }
        _ => scalar_text(value).map(FieldValue::Text),
    }
}

/// Strings and numbers as trimmed text; everything else is not a scalar.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty() && !is_null_word(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Models sometimes spell null as text.
fn is_null_word(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "null" | "none" | "n/a" | "not specified" | "unknown"
    )
}

fn exam_entry(value: &Value) -> Option<ExamEntry> {
    match value {
        Value::Object(map) => {
            let name = map
                .get("exam_name")
                .or_else(|| map.get("name"))
                .and_then(scalar_text)?;
            let details = map
                .get("details")
                .or_else(|| map.get("score"))
                .and_then(scalar_text)
                .unwrap_or_default();
            Some(ExamEntry {
                exam_name: name,
                details,
            })
        }
        other => scalar_text(other).map(|name| ExamEntry {
            exam_name: name,
            details: String::new(),
        }),
    }
}

/// Split `"US and Canada"` / `"UK, Ireland"` into an ordered list.
pub fn split_locations(s: &str) -> Vec<String> {
    static SEPARATORS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|;|/|&|\band\b|\bor\b)\s*").expect("valid regex"));

    let mut out: Vec<String> = Vec::new();
    for part in SEPARATORS.split(s) {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|p| p.eq_ignore_ascii_case(part)) {
            out.push(part.to_string());
        }
    }
    out
}
