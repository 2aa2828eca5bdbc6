use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use canon_core::entry::fetch_value;
use canon_core::{Category, Entry, FieldValue, Result, Scalar, FILES_FIELD};

use super::Conversion;

/// Assigns a [`Category`] to every metadata field from its value distribution.
#[derive(Debug, Default, Clone, Copy)]
pub struct CategorizeConversion;

impl Conversion for CategorizeConversion {
    fn name(&self) -> &str {
        "categorize"
    }

    fn convert(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let categories = field_categories(&entries);

        for entry in &mut entries {
            for (field_name, field) in entry.metadata.iter_mut() {
                if field_name == FILES_FIELD || matches!(field, FieldValue::Raw(_)) {
                    continue;
                }
                if let Some(category) = categories.get(field_name) {
                    field.promote().category = Some(*category);
                }
            }
        }

        debug!(
            entries = entries.len(),
            fields = categories.len(),
            "metadata categorized"
        );
        Ok(entries)
    }
}

/// Category per metadata field name, in order of first appearance.
pub fn field_categories(entries: &[Entry]) -> IndexMap<String, Category> {
    let mut names: IndexMap<&str, ()> = IndexMap::new();
    for entry in entries {
        for name in entry.metadata.keys() {
            if name != FILES_FIELD {
                names.insert(name.as_str(), ());
            }
        }
    }

    names
        .into_keys()
        .map(|name| {
            let values: Vec<Option<Scalar>> = entries
                .iter()
                .map(|e| fetch_value(&e.metadata, name))
                .collect();
            (name.to_string(), categorize_values(&values))
        })
        .collect()
}

/// Classify one field given its value in every entry (`None` = absent).
pub fn categorize_values(values: &[Option<Scalar>]) -> Category {
    let present: Vec<&Scalar> = values.iter().flatten().collect();
    let Some(first) = present.first() else {
        return Category::Same;
    };

    let distinct: HashSet<String> = present.iter().map(|v| v.to_string()).collect();
    let absent = values.len() - present.len();

    if distinct.len() == 1 {
        return if absent > 0 {
            Category::Group
        } else {
            Category::Same
        };
    }

    if distinct.len() == present.len() {
        return if is_timestamp_like(first) {
            Category::Timestamp
        } else {
            Category::Unique
        };
    }

    Category::Group
}

// ── Timestamp heuristic ─────────────────────────────────────────────

const TIMESTAMP_PATTERNS: &[&str] = &[
    // 2025-05-23T11:48:26.341261+00:00
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+[+-]\d{2}:\d{2}$",
    // 2025-05-23T11:48:26.341267
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+$",
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}$",
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}$",
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+Z$",
    r"^\d{4}-\d{2}-\d{2}$",
    // epoch seconds / milliseconds as strings
    r"^\d{10}$",
    r"^\d{13}$",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

fn timestamp_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        TIMESTAMP_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn date_like() -> Option<&'static Regex> {
    static DATE: OnceLock<Option<Regex>> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"\d{4}[-/]\d{1,2}[-/]\d{1,2}").ok())
        .as_ref()
}

fn time_like() -> Option<&'static Regex> {
    static TIME: OnceLock<Option<Regex>> = OnceLock::new();
    TIME.get_or_init(|| Regex::new(r"\d{1,2}:\d{2}").ok()).as_ref()
}

/// Whether a value reads as a point in time. Only text qualifies.
pub fn is_timestamp_like(value: &Scalar) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };

    if timestamp_patterns().iter().any(|re| re.is_match(text)) {
        return true;
    }

    if DateTime::parse_from_rfc3339(text).is_ok()
        || DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z").is_ok()
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(text, f).is_ok())
        || DATE_FORMATS
            .iter()
            .any(|f| NaiveDate::parse_from_str(text, f).is_ok())
    {
        return true;
    }

    date_like().is_some_and(|re| re.is_match(text))
        && (text.contains('T') || time_like().is_some_and(|re| re.is_match(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::test_support::{entry, text};

    fn values(raw: &[Option<&str>]) -> Vec<Option<Scalar>> {
        raw.iter().map(|v| v.map(Scalar::from)).collect()
    }

    #[test]
    fn group_same_unique() {
        assert_eq!(
            categorize_values(&values(&[Some("a"), Some("a"), Some("b")])),
            Category::Group
        );
        assert_eq!(
            categorize_values(&values(&[Some("a"), Some("a")])),
            Category::Same
        );
        assert_eq!(
            categorize_values(&values(&[Some("r1"), Some("r2"), Some("r3")])),
            Category::Unique
        );
        assert_eq!(categorize_values(&values(&[None, None])), Category::Same);
    }

    #[test]
    fn present_versus_absent_is_group() {
        assert_eq!(
            categorize_values(&values(&[Some("x"), None, Some("x")])),
            Category::Group
        );
    }

    #[test]
    fn distinct_timestamps() {
        assert_eq!(
            categorize_values(&values(&[
                Some("2025-05-23T11:48:26"),
                Some("2025-05-24T11:48:26")
            ])),
            Category::Timestamp
        );
    }

    #[test]
    fn numeric_values_are_never_timestamps() {
        let nums = vec![Some(Scalar::Number(1.0)), Some(Scalar::Number(2.0))];
        assert_eq!(categorize_values(&nums), Category::Unique);
    }

    #[test]
    fn timestamp_heuristic_variants() {
        for ok in [
            "2025-05-23T11:48:26.341261+00:00",
            "2025-05-23T11:48:26.341267",
            "2025-05-23T11:48",
            "2025-05-23T11:48:26.341261Z",
            "2025-05-23",
            "1716464906",
            "1716464906341",
            "2025-05-23 11:48:26",
            "05/23/2025",
            "2025/5/3 7:05",
        ] {
            assert!(is_timestamp_like(&Scalar::from(ok)), "{ok}");
        }
        for not in ["agent-a", "v1.2.3", "12345", "2025"] {
            assert!(!is_timestamp_like(&Scalar::from(not)), "{not}");
        }
    }

    #[test]
    fn writes_category_back_promoting_scalars() {
        let entries = vec![
            entry("1", &[("agent_name", text("a")), ("run_id", text("r1"))], &[]),
            entry("2", &[("agent_name", text("a")), ("run_id", text("r2"))], &[]),
            entry("3", &[("agent_name", text("b")), ("run_id", text("r3"))], &[]),
        ];
        let out = CategorizeConversion.convert(entries).unwrap();
        for e in &out {
            assert_eq!(e.metadata["agent_name"].category(), Some(Category::Group));
            assert_eq!(e.metadata["run_id"].category(), Some(Category::Unique));
        }
        assert_eq!(out[0].fetch("agent_name"), Some(Scalar::from("a")));
    }

    #[test]
    fn files_field_is_skipped() {
        let files: FieldValue = serde_json::from_str(r#"["a.log"]"#).unwrap();
        let entries = vec![entry("1", &[("files", files.clone()), ("k", text("v"))], &[])];
        let out = CategorizeConversion.convert(entries).unwrap();
        assert_eq!(out[0].metadata["files"], files);
        assert_eq!(out[0].metadata["k"].category(), Some(Category::Same));
    }
}
