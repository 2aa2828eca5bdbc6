//! Grouping and aggregation of entries.
//!
//! Entries are grouped by a slice key (one slot per slice condition) and each
//! group collapses into one entry. Metrics become a mean with `min_value`,
//! `max_value` and `n_samples`; metadata shared by every member is kept, and
//! timestamp or numeric unique metadata is summarized as a range.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use canon_core::{
    Annotated, Category, Condition, Entry, FieldValue, Fields, Result, Scalar, FILES_FIELD,
};

use super::Conversion;

/// How a metric missing from some group members is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentMetricsPolicy {
    /// Absent or non-numeric counts as `0`.
    Nullify,
    /// Absent members are left out of the sample.
    AcceptSubset,
    /// The metric is dropped unless every member has it.
    #[default]
    AllOrNothing,
}

impl AbsentMetricsPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsentMetricsPolicy::Nullify => "nullify",
            AbsentMetricsPolicy::AcceptSubset => "accept_subset",
            AbsentMetricsPolicy::AllOrNothing => "all_or_nothing",
        }
    }
}

/// One slot of a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SliceValue {
    /// Fetched value of a `Slice` field (`None` when absent).
    Value(Option<Scalar>),
    /// Result of checking a non-slice condition.
    Check(bool),
}

pub type SliceKey = Vec<SliceValue>;

/// Compute the grouping key of an entry.
pub fn slice_key(entry: &Entry, slices: &[Condition]) -> Result<SliceKey> {
    slices
        .iter()
        .map(|condition| {
            let value = entry.fetch(condition.field_name());
            if condition.is_slice() {
                Ok(SliceValue::Value(value))
            } else {
                condition.check(value.as_ref()).map(SliceValue::Check)
            }
        })
        .collect()
}

/// Partition entries by slice key, groups in order of first occurrence.
pub fn group_entries(
    entries: Vec<Entry>,
    slices: &[Condition],
) -> Result<IndexMap<SliceKey, Vec<Entry>>> {
    let mut groups: IndexMap<SliceKey, Vec<Entry>> = IndexMap::new();
    for entry in entries {
        let key = slice_key(&entry, slices)?;
        groups.entry(key).or_default().push(entry);
    }
    Ok(groups)
}

/// Collapses each slice group into one aggregated entry.
#[derive(Debug, Clone)]
pub struct AggregateConversion {
    slices: Vec<Condition>,
    policy: AbsentMetricsPolicy,
}

impl AggregateConversion {
    pub fn new(slices: Vec<Condition>, policy: AbsentMetricsPolicy) -> Self {
        Self { slices, policy }
    }
}

impl Conversion for AggregateConversion {
    fn name(&self) -> &str {
        "aggregate"
    }

    /// Output order follows first occurrence of each group; callers sort afterwards.
    fn convert(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let groups = group_entries(entries, &self.slices)?;
        Ok(groups
            .iter()
            .map(|(key, members)| aggregate_group(&self.slices, key, members, self.policy))
            .collect())
    }
}

/// Aggregate one group of entries sharing `key`.
pub fn aggregate_group(
    slices: &[Condition],
    key: &[SliceValue],
    members: &[Entry],
    policy: AbsentMetricsPolicy,
) -> Entry {
    let name = group_name(slices, key);
    debug!(group = %name, members = members.len(), "aggregating group");

    let mut entry = Entry {
        name,
        metadata: aggregate_metadata(members),
        metrics: aggregate_metrics(members, policy),
    };
    entry.sort_fields();
    entry
}

/// Name a group after its key: `<field>_<value|none>` for slices and the
/// condition's string form (prefixed `not_` when false) for predicates.
pub fn group_name(slices: &[Condition], key: &[SliceValue]) -> String {
    let parts: Vec<String> = slices
        .iter()
        .zip(key)
        .map(|(condition, slot)| {
            let raw = match slot {
                SliceValue::Value(Some(v)) => format!("{}_{}", condition.field_name(), v),
                SliceValue::Value(None) => format!("{}_none", condition.field_name()),
                SliceValue::Check(true) => condition.to_string(),
                SliceValue::Check(false) => format!("not_{condition}"),
            };
            raw.replace(['/', ':', ' '], "_")
        })
        .collect();

    if parts.is_empty() {
        "aggregated".to_string()
    } else {
        parts.join("_")
    }
}

// ── Metadata ────────────────────────────────────────────────────────

pub fn aggregate_metadata(members: &[Entry]) -> Fields {
    let mut names: IndexMap<&str, ()> = IndexMap::new();
    for member in members {
        for name in member.metadata.keys() {
            if name != FILES_FIELD {
                names.insert(name, ());
            }
        }
    }

    let mut out = Fields::new();
    for name in names.into_keys() {
        let first = members.first().and_then(|m| m.metadata.get(name));
        let same_in_all = members.iter().all(|m| m.metadata.get(name) == first);

        let template = members
            .iter()
            .find_map(|m| m.metadata.get(name).and_then(FieldValue::as_annotated));

        if let Some(template) = template.filter(|t| is_summarized(t)) {
            if let Some((min, max, n)) = summarize_metadata(name, members) {
                let mut summary = template.clone();
                if !same_in_all {
                    summary.value = None;
                }
                summary.min_value = Some(min);
                summary.max_value = Some(max);
                summary.n_samples = Some(n);
                out.insert(name.to_string(), FieldValue::Annotated(summary));
                continue;
            }
        }

        if same_in_all {
            if let Some(value) = first {
                out.insert(name.to_string(), value.clone());
            }
        }
    }
    out
}

fn is_summarized(field: &Annotated) -> bool {
    match field.category {
        Some(Category::Timestamp) => true,
        Some(Category::Unique) => field.value.as_ref().is_some_and(Scalar::is_number),
        _ => false,
    }
}

/// Range and sample count over members with a truthy value.
fn summarize_metadata(name: &str, members: &[Entry]) -> Option<(Scalar, Scalar, usize)> {
    let mut range: Option<(Scalar, Scalar)> = None;
    let mut n = 0;

    for member in members {
        let Some(value) = canon_core::entry::fetch_value(&member.metadata, name) else {
            continue;
        };
        if !value.is_truthy() {
            continue;
        }
        match range.as_mut() {
            None => range = Some((value.clone(), value)),
            Some((min, max)) => {
                match (value.compare(min), value.compare(max)) {
                    (Some(lo), Some(hi)) => {
                        if lo == Ordering::Less {
                            *min = value.clone();
                        }
                        if hi == Ordering::Greater {
                            *max = value;
                        }
                    }
                    _ => {
                        warn!(field = name, value = %value, "Skipping incomparable metadata value");
                        continue;
                    }
                }
            }
        }
        n += 1;
    }

    range.map(|(min, max)| (min, max, n))
}

// ── Metrics ─────────────────────────────────────────────────────────

pub fn aggregate_metrics(members: &[Entry], policy: AbsentMetricsPolicy) -> Fields {
    let mut out = Fields::new();
    let Some(first) = members.first() else {
        return out;
    };

    for (key, template) in &first.metrics {
        if !template.value().is_some_and(Scalar::is_number) {
            continue;
        }
        if let Some(aggregated) = aggregate_metric(key, template, members, policy) {
            out.insert(key.clone(), FieldValue::Annotated(aggregated));
        }
    }
    out
}

fn aggregate_metric(
    key: &str,
    template: &FieldValue,
    members: &[Entry],
    policy: AbsentMetricsPolicy,
) -> Option<Annotated> {
    let mut total = 0.0;
    let mut n = 0usize;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut prune_in_all = true;

    for member in members {
        let field = member.metrics.get(key);
        let value = match field.and_then(FieldValue::value) {
            Some(Scalar::Number(v)) => Some(*v),
            Some(other) => {
                warn!(metric = key, entry = %member.name, value = %other, "Non-numeric metric value");
                None
            }
            None => None,
        };

        let value = match (value, policy) {
            (Some(v), _) => v,
            (None, AbsentMetricsPolicy::Nullify) => 0.0,
            (None, AbsentMetricsPolicy::AcceptSubset) => {
                debug!(
                    policy = policy.as_str(),
                    metric = key,
                    entry = %member.name,
                    "member excluded from metric sample"
                );
                continue;
            }
            (None, AbsentMetricsPolicy::AllOrNothing) => {
                debug!(
                    policy = policy.as_str(),
                    metric = key,
                    entry = %member.name,
                    "metric dropped: missing in group member"
                );
                return None;
            }
        };

        total += value;
        n += 1;
        min = min.min(value);
        max = max.max(value);
        if !field.is_some_and(FieldValue::is_pruned) {
            prune_in_all = false;
        }
    }

    if n == 0 {
        debug!(policy = policy.as_str(), metric = key, "metric dropped: no samples");
        return None;
    }

    let mut aggregated = template.to_annotated();
    aggregated.value = Some(Scalar::Number(total / n as f64));
    aggregated.min_value = Some(Scalar::Number(min));
    aggregated.max_value = Some(Scalar::Number(max));
    aggregated.n_samples = Some(n);
    if !prune_in_all {
        aggregated.prune = None;
    }
    Some(aggregated)
}
