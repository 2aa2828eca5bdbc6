use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::field::{FieldValue, Scalar};

/// Metadata field reserved for entry-associated files. Never categorized or tabulated.
pub const FILES_FIELD: &str = "files";

/// Ordered field name → field value map.
pub type Fields = IndexMap<String, FieldValue>;

/// One measurement record: descriptive metadata plus measured metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: Fields,
    #[serde(default)]
    pub metrics: Fields,
}

impl Entry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style metadata insert.
    pub fn with_metadata(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style metric insert.
    pub fn with_metric(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    /// Fetch a value by field path, looking in metadata first, then metrics.
    ///
    /// `name` returns the field's value; `name/min_value` (and the other
    /// side channels) reach into an annotated field.
    pub fn fetch(&self, field_path: &str) -> Option<Scalar> {
        fetch_value(&self.metadata, field_path).or_else(|| fetch_value(&self.metrics, field_path))
    }

    /// Demote annotated fields that carry nothing but a value.
    pub fn flatten_values(&mut self) {
        flatten_fields(&mut self.metadata);
        flatten_fields(&mut self.metrics);
    }

    /// Clear `prune` and `category` side channels on every field.
    pub fn remove_subfields(&mut self) {
        for field in self.metadata.values_mut().chain(self.metrics.values_mut()) {
            field.strip_annotations();
        }
    }

    /// Sort both maps by key for stable output.
    pub fn sort_fields(&mut self) {
        self.metadata.sort_keys();
        self.metrics.sort_keys();
    }
}

/// Fetch `field_path` from one field map.
///
/// A direct hit wins, so field names may themselves contain `/`. Otherwise the
/// last path segment is treated as a subfield of its parent.
pub fn fetch_value(fields: &Fields, field_path: &str) -> Option<Scalar> {
    if let Some(field) = fields.get(field_path) {
        return field.value().cloned();
    }
    let (parent, subfield) = field_path.rsplit_once('/')?;
    fields
        .get(parent)
        .and_then(FieldValue::as_annotated)
        .and_then(|a| a.subfield(subfield))
}

pub fn flatten_fields(fields: &mut Fields) {
    for field in fields.values_mut() {
        let owned = std::mem::replace(field, FieldValue::Scalar(Scalar::Bool(false)));
        *field = owned.flatten();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Annotated, Category};

    fn sample() -> Entry {
        Entry::new("run-1")
            .with_metadata("agent_name", "alpha")
            .with_metadata(
                "time_end_utc",
                Annotated {
                    value: Some("2025-05-23T11:48:26".into()),
                    category: Some(Category::Timestamp),
                    max_value: Some("2025-05-23T11:48:26".into()),
                    ..Default::default()
                },
            )
            .with_metric("latency_ms", 12.0)
            .with_metric(
                "api/calls/count",
                Annotated {
                    value: Some(Scalar::Number(3.0)),
                    n_samples: Some(2),
                    ..Default::default()
                },
            )
    }

    #[test]
    fn fetch_bare_and_annotated() {
        let e = sample();
        assert_eq!(e.fetch("agent_name"), Some(Scalar::Text("alpha".into())));
        assert_eq!(e.fetch("latency_ms"), Some(Scalar::Number(12.0)));
        assert_eq!(e.fetch("api/calls/count"), Some(Scalar::Number(3.0)));
    }

    #[test]
    fn fetch_subfield() {
        let e = sample();
        assert_eq!(e.fetch("api/calls/count/n_samples"), Some(Scalar::Number(2.0)));
        assert_eq!(
            e.fetch("time_end_utc/max_value"),
            Some(Scalar::Text("2025-05-23T11:48:26".into()))
        );
        assert_eq!(e.fetch("api/calls/count/max_value"), None);
        assert_eq!(e.fetch("latency_ms/min_value"), None);
        assert_eq!(e.fetch("missing"), None);
    }

    #[test]
    fn flatten_and_strip() {
        let mut e = Entry::new("x").with_metric(
            "m",
            Annotated {
                value: Some(Scalar::Number(1.0)),
                prune: Some(true),
                ..Default::default()
            },
        );
        e.flatten_values();
        assert!(e.metrics["m"].as_annotated().is_some());

        e.remove_subfields();
        e.flatten_values();
        assert_eq!(e.metrics["m"], FieldValue::from(1.0));
    }

    #[test]
    fn deserialize_entry_json() {
        let e: Entry = serde_json::from_str(
            r#"{"name": "r", "metadata": {"agent": "a"}, "metrics": {"x": {"value": 2}}}"#,
        )
        .unwrap();
        assert_eq!(e.fetch("x"), Some(Scalar::Number(2.0)));
        assert_eq!(e.fetch("agent"), Some(Scalar::Text("a".into())));
    }
}
