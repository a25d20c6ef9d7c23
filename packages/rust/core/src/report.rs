//! Markdown report of a run: profile table, one section per stage, and the
//! Q&A appendix. Output depends only on the inputs.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use smartadmit_shared::{
    NOT_SPECIFIED, Profile, ProfileField, QaExchange, Reconciled, StageResult,
};

use crate::pipeline::AdmissionStage;

/// Keys used, in order, to title a record.
const HEADING_KEYS: [&str; 4] = ["university", "name", "program", "source"];

pub fn render_report(
    profile: &Profile,
    results: &[StageResult],
    qa: &[QaExchange],
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let student = profile
        .get(ProfileField::StudentName)
        .map(ToString::to_string)
        .unwrap_or_else(|| "Student".to_string());

    let _ = writeln!(out, "# Admissions Report: {student}\n");
    let _ = writeln!(out, "_Generated {}_\n", generated_at.format("%Y-%m-%d %H:%M UTC"));

    // --- Profile ---
    out.push_str("## Profile\n\n| Field | Value |\n|---|---|\n");
    for field in ProfileField::ALL {
        let _ = writeln!(out, "| {} | {} |", field.label(), cell(&profile.display(field)));
    }
    if let Some(feedback) = &profile.user_feedback {
        let _ = writeln!(out, "\n**Refinement feedback:** {feedback}");
    }

    // --- Stages ---
    for stage in AdmissionStage::ALL {
        let _ = writeln!(out, "\n## {}\n", stage.title());
        match results.iter().find(|r| r.stage == stage.key()) {
            Some(result) => render_result(&mut out, result),
            None => out.push_str("_Not yet available._\n"),
        }
    }

    // --- Q&A ---
    if !qa.is_empty() {
        out.push_str("\n## Questions & Answers\n");
        for exchange in qa {
            let _ = writeln!(out, "\n**Q:** {}\n\n{}", exchange.question, exchange.answer);
        }
    }

    out
}

fn render_result(out: &mut String, result: &StageResult) {
    match &result.reconciled {
        Reconciled::Records(records) if records.is_empty() => out.push_str("_No entries._\n"),
        Reconciled::Records(records) => {
            for (i, record) in records.iter().enumerate() {
                render_record(out, record, Some(i + 1));
            }
        }
        Reconciled::Record(record) => render_record(out, record, None),
        Reconciled::Narrative(text) => {
            out.push_str(text);
            out.push('\n');
        }
        Reconciled::NoResults(sentinel) => {
            let _ = writeln!(out, "> {sentinel}.");
        }
    }

    if !result.sources.is_empty() {
        out.push_str("\nSources:\n");
        for source in &result.sources {
            let _ = writeln!(out, "- <{source}>");
        }
    }
}

fn render_record(out: &mut String, record: &Map<String, Value>, index: Option<usize>) {
    let heading_key = HEADING_KEYS.iter().find(|k| {
        record
            .get(**k)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    });

    match (heading_key, index) {
        (Some(key), _) => {
            let _ = writeln!(out, "### {}\n", render_value(key, &record[*key]));
        }
        (None, Some(n)) => {
            let _ = writeln!(out, "### Item {n}\n");
        }
        (None, None) => {}
    }

    for (key, value) in record {
        if heading_key.is_some_and(|h| *h == key.as_str()) {
            continue;
        }
        let _ = writeln!(out, "- **{}**: {}", label(key), render_value(key, value));
    }
    out.push('\n');
}

fn render_value(key: &str, value: &Value) -> String {
    if is_rating_key(key) {
        if let Some(rating) = rating_number(value) {
            return rating_to_stars(rating);
        }
    }
    match value {
        Value::Null => NOT_SPECIFIED.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => items
            .iter()
            .map(|v| render_value("", v))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn is_rating_key(key: &str) -> bool {
    key == "rating" || key.ends_with("_rating")
}

/// Accepts `4.5`, `"4.5"` and `"4.5/5"`.
fn rating_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split('/').next()?.trim().parse().ok(),
        _ => None,
    }
}

/// `4.5` renders as `4.5/5 ⭐⭐⭐⭐⭐`; a half star rounds up, the rest is `☆`.
pub fn rating_to_stars(rating: f64) -> String {
    let rating = rating.clamp(0.0, 5.0);
    let full = rating.floor() as usize;
    let half = usize::from(rating - rating.floor() >= 0.5);
    let empty = 5 - full - half;
    format!("{rating}/5 {}{}", "⭐".repeat(full + half), "☆".repeat(empty))
}

/// `annual_tuition_inr` → `Annual tuition inr`.
fn label(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
