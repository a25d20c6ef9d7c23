//! Turns raw model text into a structured or narrative result.
//!
//! Priority, first match wins: the no-results sentinel, an array of records,
//! a single record, then the trimmed text as narrative. Never fails.

use serde_json::{Map, Value};

use smartadmit_shared::{NO_RESULTS_SENTINEL, Reconciled};

/// Reconcile one stage's raw output.
pub fn reconcile(raw: &str) -> Reconciled {
    if contains_sentinel(raw) {
        return Reconciled::NoResults(NO_RESULTS_SENTINEL.to_string());
    }

    if let Some(records) = find_record_array(raw) {
        return Reconciled::Records(records);
    }

    if let Some(record) = find_record(raw) {
        return Reconciled::Record(record);
    }

    Reconciled::Narrative(raw.trim().to_string())
}

/// Extract the first JSON object in `raw`, if any.
pub fn find_record(raw: &str) -> Option<Map<String, Value>> {
    find_literal(raw, '{', '}', |value| match value {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

fn contains_sentinel(raw: &str) -> bool {
    raw.to_ascii_lowercase()
        .contains(&NO_RESULTS_SENTINEL.to_ascii_lowercase())
}

/// A non-empty array of records wins over an empty `[]` anywhere in the text;
/// the empty array is only returned when nothing better exists.
fn find_record_array(raw: &str) -> Option<Vec<Map<String, Value>>> {
    find_literal(raw, '[', ']', |value| {
        records(value).filter(|records| !records.is_empty())
    })
    .or_else(|| {
        find_literal(raw, '[', ']', |value| {
            records(value).filter(|records| records.is_empty())
        })
    })
}

fn records(value: Value) -> Option<Vec<Map<String, Value>>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Try the widest `open..=close` span first, then the first complete literal
/// starting at each `open` in order. `accept` filters by shape.
fn find_literal<T>(
    raw: &str,
    open: char,
    close: char,
    accept: impl Fn(Value) -> Option<T>,
) -> Option<T> {
    let first = raw.find(open)?;

    if let Some(last) = raw.rfind(close) {
        if last > first {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[first..=last]) {
                if let Some(found) = accept(value) {
                    return Some(found);
                }
            }
        }
    }

    for (pos, _) in raw.match_indices(open) {
        let mut stream = serde_json::Deserializer::from_str(&raw[pos..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if let Some(found) = accept(value) {
                return Some(found);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_wins_over_structure() {
        let raw = r#"No matching scholarships found. [{"name":"x"}]"#;
        assert_eq!(
            reconcile(raw),
            Reconciled::NoResults(NO_RESULTS_SENTINEL.into())
        );
    }

    #[test]
    fn sentinel_is_case_insensitive() {
        let raw = "Sorry: no MATCHING scholarships found for this profile.";
        assert!(matches!(reconcile(raw), Reconciled::NoResults(_)));
    }

    #[test]
    fn array_embedded_in_prose() {
        let raw = r#"Here are results: [{"university":"U1"},{"university":"U2"}] Hope this helps."#;
        match reconcile(raw) {
            Reconciled::Records(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0]["university"], "U1");
                assert_eq!(records[1]["university"], "U2");
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn empty_array_is_accepted() {
        assert_eq!(reconcile("Results: []"), Reconciled::Records(vec![]));
    }

    #[test]
    fn empty_array_does_not_hide_later_records() {
        let raw = r#"Text [] then [{"a":1}]"#;
        match reconcile(raw) {
            Reconciled::Records(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0]["a"], 1);
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn array_of_scalars_is_not_records() {
        let raw = "Ranked by [1] tuition and [2] reputation.";
        assert_eq!(reconcile(raw), Reconciled::Narrative(raw.into()));
    }

    #[test]
    fn later_array_found_when_widest_span_is_invalid() {
        let raw = r#"See note [a]. Data: [{"k": 1}] and footnote [b]"#;
        match reconcile(raw) {
            Reconciled::Records(records) => assert_eq!(records[0]["k"], 1),
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn object_when_no_array() {
        let raw = "```json\n{\"student_name\": \"Asha\", \"cgpa\": \"8.1\"}\n```";
        match reconcile(raw) {
            Reconciled::Record(map) => {
                assert_eq!(map["student_name"], "Asha");
                assert_eq!(map["cgpa"], "8.1");
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn object_containing_arrays_of_scalars_is_a_record() {
        let raw = r#"{"preferred_locations": ["UK", "Ireland"], "budget": null}"#;
        assert!(matches!(reconcile(raw), Reconciled::Record(_)));
    }

    #[test]
    fn malformed_json_falls_back_to_narrative() {
        let raw = "  Top pick: {university: U1, fee: ...}  ";
        assert_eq!(
            reconcile(raw),
            Reconciled::Narrative("Top pick: {university: U1, fee: ...}".into())
        );
    }

    #[test]
    fn reconcile_is_total() {
        for raw in ["[", "]", "}{", "[{]", "{\"a\":", "[[[[", "ünïcödé [ {"] {
            assert_eq!(reconcile(raw), Reconciled::Narrative(raw.into()), "input {raw:?}");
        }
        assert_eq!(reconcile(""), Reconciled::Narrative(String::new()));
        assert_eq!(reconcile("\u{0}"), Reconciled::Narrative("\u{0}".into()));
        assert_eq!(reconcile("   "), Reconciled::Narrative(String::new()));
    }

    #[test]
    fn find_record_skips_leading_braces() {
        let raw = r#"Template {x} then {"ok": true}"#;
        let record = find_record(raw).expect("record");
        assert_eq!(record["ok"], true);
    }
}
