use std::cmp::Ordering;

use canon_core::{EngineConfig, Entry, Result, Scalar};

use super::Conversion;

/// Sorts entries descending by a field (most recent first for time fields).
///
/// Entries without the field (or with a falsy value) go last. When a fallback
/// field is set it is consulted before giving up on an entry.
#[derive(Debug, Clone)]
pub struct SortByFieldConversion {
    field: String,
    fallback: Option<String>,
}

impl SortByFieldConversion {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Sort by the configured time field, falling back to the secondary one.
    pub fn by_time(config: &EngineConfig) -> Self {
        Self::new(config.time.field.clone()).with_fallback(config.time.fallback_field.clone())
    }

    /// Sort aggregated entries by their latest time.
    pub fn by_aggregated_time(config: &EngineConfig) -> Self {
        Self::new(config.time.aggregated_field.clone())
    }

    fn sort_key(&self, entry: &Entry) -> Option<Scalar> {
        let primary = entry.fetch(&self.field).filter(Scalar::is_truthy);
        primary.or_else(|| {
            self.fallback
                .as_deref()
                .and_then(|f| entry.fetch(f))
                .filter(Scalar::is_truthy)
        })
    }
}

impl Conversion for SortByFieldConversion {
    fn name(&self) -> &str {
        "sort"
    }

    fn convert(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let mut keyed: Vec<(Option<Scalar>, Entry)> =
            entries.into_iter().map(|e| (self.sort_key(&e), e)).collect();
        keyed.sort_by(|(a, _), (b, _)| descending_missing_last(a.as_ref(), b.as_ref()));
        Ok(keyed.into_iter().map(|(_, e)| e).collect())
    }
}

pub(crate) fn descending_missing_last(a: Option<&Scalar>, b: Option<&Scalar>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::test_support::{entry, text};

    #[test]
    fn most_recent_first_missing_last() {
        let entries = vec![
            entry("old", &[("time_end_utc", text("2025-01-01T00:00:00"))], &[]),
            entry("none", &[], &[]),
            entry("new", &[("time_end_utc", text("2025-03-01T00:00:00"))], &[]),
            entry("mid", &[("time_end_utc", text("2025-02-01T00:00:00"))], &[]),
        ];
        let out = SortByFieldConversion::new("time_end_utc")
            .convert(entries)
            .unwrap();
        let names: Vec<_> = out.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old", "none"]);
    }

    #[test]
    fn falls_back_to_secondary_field() {
        let config = EngineConfig::default();
        let entries = vec![
            entry("primary", &[("time_end_utc", text("2025-01-01T00:00:00"))], &[]),
            entry("fallback", &[("instance_updated_at", text("2025-06-01T00:00:00"))], &[]),
            entry("empty", &[("time_end_utc", text(""))], &[]),
        ];
        let out = SortByFieldConversion::by_time(&config).convert(entries).unwrap();
        let names: Vec<_> = out.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["fallback", "primary", "empty"]);
    }
}
