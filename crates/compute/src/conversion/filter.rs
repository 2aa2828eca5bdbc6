use canon_core::{Condition, Entry, Result};

use super::Conversion;

/// Keeps entries that pass every condition.
#[derive(Debug, Clone, Default)]
pub struct FilterConversion {
    conditions: Vec<Condition>,
}

impl FilterConversion {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

impl Conversion for FilterConversion {
    fn name(&self) -> &str {
        "filter"
    }

    fn convert(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if passes_all(&entry, &self.conditions)? {
                kept.push(entry);
            }
        }
        Ok(kept)
    }
}

/// Check an entry against every condition. A `Slice` among them is an error.
pub fn passes_all(entry: &Entry, conditions: &[Condition]) -> Result<bool> {
    for condition in conditions {
        if !condition.check(entry.fetch(condition.field_name()).as_ref())? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::test_support::{entry, text};
    use canon_core::parse_conditions;

    #[test]
    fn keeps_entries_matching_all_conditions() {
        let entries = vec![
            entry("1", &[("agent", text("a"))], &[("latency", 5.0)]),
            entry("2", &[("agent", text("b"))], &[("latency", 50.0)]),
            entry("3", &[("agent", text("a"))], &[("latency", 500.0)]),
        ];
        let filter = FilterConversion::new(parse_conditions("agent:in:a;latency:range::100"));
        let out = filter.convert(entries).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "1");
    }

    #[test]
    fn version_membership_is_textual() {
        let entries = || {
            vec![
                entry("old", &[("agent_version", text("1.1"))], &[]),
                entry("new", &[("agent_version", text("1.10"))], &[]),
            ]
        };
        let names = |conditions: &str| -> Vec<String> {
            FilterConversion::new(parse_conditions(conditions))
                .convert(entries())
                .unwrap()
                .into_iter()
                .map(|e| e.name)
                .collect()
        };
        assert_eq!(names("agent_version:in:1.10"), vec!["new"]);
        assert_eq!(names("agent_version:not_in:1.10"), vec!["old"]);
    }

    #[test]
    fn no_conditions_keeps_everything() {
        let entries = vec![Entry::new("1"), Entry::new("2")];
        assert_eq!(FilterConversion::default().convert(entries).unwrap().len(), 2);
    }

    #[test]
    fn slice_condition_is_rejected() {
        let filter = FilterConversion::new(parse_conditions("agent"));
        assert!(filter.convert(vec![Entry::new("1")]).is_err());
    }
}
