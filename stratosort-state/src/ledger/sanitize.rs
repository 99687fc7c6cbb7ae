//! Shape and length sanitization of analysis payloads before they are queued.
//!
//! Payloads come from the inference engine as loosely typed JSON. Each field is
//! optional and checked on its own: a field with the wrong JSON type is
//! dropped, strings are trimmed and capped on character boundaries, and lists
//! are de-duplicated case-insensitively.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_NAME_CHARS: usize = 255;
pub const MAX_CATEGORY_CHARS: usize = 100;
pub const MAX_KEYWORD_CHARS: usize = 50;
pub const MAX_KEYWORDS: usize = 20;
pub const MAX_SUMMARY_CHARS: usize = 2_000;
pub const MAX_PURPOSE_CHARS: usize = 1_000;
pub const MAX_PROJECT_CHARS: usize = 255;
pub const MAX_DATE_CHARS: usize = 64;
pub const MAX_WARNING_CHARS: usize = 1_000;
pub const MAX_WARNINGS: usize = 10;
pub const MAX_MODEL_CHARS: usize = 100;
pub const CONFIDENCE_RANGE: (f64, f64) = (0.0, 100.0);

/// Sanitized analysis result stored with a ready entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AnalysisSummary {
    /// An entry is worth queueing only if it can name, file, or tag the file.
    pub fn has_content(&self) -> bool {
        self.suggested_name.is_some()
            || self.category.is_some()
            || !self.keywords.is_empty()
    }
}

/// Sanitize a raw payload. Returns `None` when the payload is not an object
/// or carries nothing usable.
pub fn sanitize_analysis(raw: &Value) -> Option<AnalysisSummary> {
    let obj = raw.as_object()?;

    let summary = AnalysisSummary {
        suggested_name: text_field(obj, &["suggestedName", "name"], MAX_NAME_CHARS),
        category: text_field(obj, &["category"], MAX_CATEGORY_CHARS),
        keywords: list_field(obj, "keywords", MAX_KEYWORDS, MAX_KEYWORD_CHARS),
        confidence: obj
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(CONFIDENCE_RANGE.0, CONFIDENCE_RANGE.1)),
        summary: text_field(obj, &["summary"], MAX_SUMMARY_CHARS),
        purpose: text_field(obj, &["purpose"], MAX_PURPOSE_CHARS),
        project: text_field(obj, &["project"], MAX_PROJECT_CHARS),
        document_date: text_field(obj, &["documentDate", "date"], MAX_DATE_CHARS),
        warnings: list_field(obj, "warnings", MAX_WARNINGS, MAX_WARNING_CHARS),
        model: text_field(obj, &["model"], MAX_MODEL_CHARS),
    };

    summary.has_content().then_some(summary)
}

/// First alias holding a non-empty string wins.
fn text_field(
    obj: &Map<String, Value>,
    aliases: &[&str],
    max_chars: usize,
) -> Option<String> {
    aliases.iter().find_map(|key| {
        obj.get(*key)
            .and_then(Value::as_str)
            .and_then(|raw| clean_text(raw, max_chars))
    })
}

fn list_field(
    obj: &Map<String, Value>,
    key: &str,
    max_items: usize,
    max_chars: usize,
) -> Vec<String> {
    let Some(items) = obj.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|raw| clean_text(raw, max_chars))
        .filter(|item| seen.insert(item.to_lowercase()))
        .take(max_items)
        .collect()
}

pub fn clean_text(raw: &str, max_chars: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let capped: String = trimmed.chars().take(max_chars).collect();
    let capped = capped.trim_end();
    (!capped.is_empty()).then(|| capped.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_is_rejected() {
        assert!(sanitize_analysis(&json!({})).is_none());
        assert!(sanitize_analysis(&json!({"summary": "only prose"})).is_none());
        assert!(sanitize_analysis(&json!("not an object")).is_none());
        assert!(sanitize_analysis(&json!({"category": "   "})).is_none());
    }

    #[test]
    fn strings_are_trimmed_and_capped() {
        let long_name = "n".repeat(400);
        let summary = sanitize_analysis(&json!({
            "suggestedName": format!("  {long_name}  "),
            "summary": "s".repeat(5_000),
            "category": "  Invoices ",
        }))
        .unwrap();

        assert_eq!(summary.suggested_name.unwrap().chars().count(), 255);
        assert_eq!(summary.summary.unwrap().chars().count(), 2_000);
        assert_eq!(summary.category.as_deref(), Some("Invoices"));
    }

    #[test]
    fn caps_respect_char_boundaries() {
        let summary = sanitize_analysis(&json!({
            "category": "é".repeat(150),
        }))
        .unwrap();
        assert_eq!(summary.category.unwrap().chars().count(), 100);
    }

    #[test]
    fn keywords_are_deduplicated_case_insensitively() {
        let summary = sanitize_analysis(&json!({
            "keywords": ["Tax", "tax", " TAX ", 42, "receipt", "", null],
        }))
        .unwrap();
        assert_eq!(summary.keywords, vec!["Tax", "receipt"]);
    }

    #[test]
    fn keyword_count_and_length_are_capped() {
        let many: Vec<String> = (0..40).map(|i| format!("kw{i}")).collect();
        let summary = sanitize_analysis(&json!({
            "keywords": many,
        }))
        .unwrap();
        assert_eq!(summary.keywords.len(), MAX_KEYWORDS);

        let summary = sanitize_analysis(&json!({
            "keywords": ["k".repeat(80)],
        }))
        .unwrap();
        assert_eq!(summary.keywords[0].len(), MAX_KEYWORD_CHARS);
    }

    #[test]
    fn confidence_is_clamped_and_type_checked() {
        let high = sanitize_analysis(&json!({"category": "a", "confidence": 140}))
            .unwrap();
        assert_eq!(high.confidence, Some(100.0));

        let low = sanitize_analysis(&json!({"category": "a", "confidence": -3.5}))
            .unwrap();
        assert_eq!(low.confidence, Some(0.0));

        let wrong = sanitize_analysis(&json!({"category": "a", "confidence": "90"}))
            .unwrap();
        assert_eq!(wrong.confidence, None);
    }

    #[test]
    fn name_alias_is_used_when_suggested_name_is_blank() {
        let summary = sanitize_analysis(&json!({
            "suggestedName": "  ",
            "name": "quarterly-report.pdf",
        }))
        .unwrap();
        assert_eq!(
            summary.suggested_name.as_deref(),
            Some("quarterly-report.pdf")
        );
    }
}
