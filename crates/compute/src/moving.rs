//! Time-bucketed aggregation series.
//!
//! The observed time span is rounded up to whole buckets of `granularity_ms`,
//! anchored so the most recent entry closes the last bucket. Buckets are
//! half-open on the left: `(begin, begin + granularity]`.

use std::cmp::Reverse;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use canon_core::field::{SUBFIELD_MAX, SUBFIELD_MIN, SUBFIELD_SAMPLES};
use canon_core::{Condition, EngineConfig, EngineError, Entry, Result, Scalar};

use crate::conversion::aggregate::aggregate_group;
use crate::conversion::filter::passes_all;
use crate::conversion::round::round_to;
use crate::conversion::{
    AbsentMetricsPolicy, CategorizeConversion, ChainConversion, Conversion, FilterConversion,
    SortByFieldConversion,
};

const NONE_LABEL: &str = "none";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAggregationParams {
    pub granularity_ms: i64,
    /// Field to aggregate. May address a side channel (`latency/max_value`).
    pub field_name: String,
    /// Applied to the whole input before bucketing.
    #[serde(default)]
    pub global_filters: Vec<Condition>,
    /// Applied per bucket; also decides which slice values exist.
    #[serde(default)]
    pub filters: Vec<Condition>,
    #[serde(default)]
    pub slice_field: Option<String>,
}

impl MovingAggregationParams {
    pub fn new(granularity_ms: i64, field_name: impl Into<String>) -> Self {
        Self {
            granularity_ms,
            field_name: field_name.into(),
            global_filters: Vec::new(),
            filters: Vec::new(),
            slice_field: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAggregation {
    /// Epoch milliseconds, exclusive.
    pub time_begin: i64,
    /// Epoch milliseconds, inclusive.
    pub time_end: i64,
    pub granularity_ms: i64,
    pub filters: Vec<Condition>,
    pub field_name: String,
    pub slice_field: Option<String>,
    /// Slice values, most recently seen first.
    pub slice_values: Vec<String>,
    /// One series per slice value (a single series when unsliced), one sample per bucket.
    pub values: Vec<Vec<f64>>,
    pub min_value: f64,
    pub max_value: f64,
}

impl MovingAggregation {
    pub fn bucket_count(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }
}

/// Bucket `entries` by time and aggregate `field_name` per bucket and slice.
pub fn moving_aggregation(
    entries: Vec<Entry>,
    params: &MovingAggregationParams,
    config: &EngineConfig,
) -> Result<MovingAggregation> {
    let start = Instant::now();
    let granularity = params.granularity_ms;
    if granularity <= 0 {
        return Err(EngineError::InvalidGranularity(granularity));
    }

    let mut chain = ChainConversion::default();
    if !params.global_filters.is_empty() {
        chain.push(FilterConversion::new(params.global_filters.clone()));
    }
    chain.push(SortByFieldConversion::by_time(config));
    chain.push(CategorizeConversion);
    let entries = chain.convert(entries)?;

    let mut result = MovingAggregation {
        time_begin: 0,
        time_end: 0,
        granularity_ms: granularity,
        filters: params.filters.clone(),
        field_name: params.field_name.clone(),
        slice_field: params.slice_field.clone(),
        slice_values: Vec::new(),
        values: Vec::new(),
        min_value: 0.0,
        max_value: 0.0,
    };

    let mut timed: Vec<(i64, &Entry)> = entries
        .iter()
        .filter_map(|entry| {
            let time = entry.fetch(&config.time.field).as_ref().and_then(parse_epoch_ms);
            if time.is_none() {
                warn!(entry = %entry.name, field = %config.time.field, "Skipping entry without a parsable time");
            }
            time.map(|t| (t, entry))
        })
        .collect();
    // Most recent first; the cursor below walks from the tail.
    timed.sort_by_key(|(t, _)| Reverse(*t));

    let (Some(&(time_end, _)), Some(&(oldest, _))) = (timed.first(), timed.last()) else {
        return Ok(result);
    };

    let mut slice_values: IndexSet<String> = IndexSet::new();
    if let Some(field) = &params.slice_field {
        for (_, entry) in &timed {
            if passes_all(entry, &params.filters)? {
                slice_values.insert(slice_label(entry.fetch(field).as_ref()));
            }
        }
    }

    let overflow = || EngineError::InvalidGranularity(granularity);
    let buckets = time_end.checked_sub(oldest).ok_or_else(overflow)? / granularity + 1;
    let time_begin = buckets
        .checked_mul(granularity)
        .and_then(|width| time_end.checked_sub(width))
        .ok_or_else(overflow)?;
    let base = base_field_name(&params.field_name);

    let mut values: Vec<Vec<f64>> = vec![Vec::new(); slice_values.len().max(1)];
    let mut range: Option<(f64, f64)> = None;
    let mut track = |value: f64| {
        range = Some(match range {
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
            None => (value, value),
        });
    };

    let mut cursor = timed.len();
    for bucket in 0..buckets {
        let bucket_end = time_begin + (bucket + 1) * granularity;
        // Members per series; values sharing a label share a series.
        let mut window: IndexMap<usize, Vec<Entry>> = IndexMap::new();
        while cursor > 0 && timed[cursor - 1].0 <= bucket_end {
            cursor -= 1;
            let entry = timed[cursor].1;
            if !passes_all(entry, &params.filters)? {
                continue;
            }
            let index = match &params.slice_field {
                Some(field) => slice_values.get_index_of(&slice_label(entry.fetch(field).as_ref())),
                None => Some(0),
            };
            let Some(index) = index else {
                warn!(bucket, entry = %entry.name, "Slice value missing from the slice index");
                continue;
            };
            window
                .entry(index)
                .or_default()
                .push(narrow(entry, params.slice_field.as_deref(), base));
        }

        for (index, members) in window {
            let aggregated = aggregate_group(&[], &[], &members, AbsentMetricsPolicy::Nullify);
            let value = match aggregated.fetch(&params.field_name) {
                Some(Scalar::Number(n)) => round_to(n, config.round_precision),
                _ => 0.0,
            };
            values[index].push(value);
            track(value);
        }

        // Keep every series the same length.
        let populated = bucket as usize;
        for series in &mut values {
            if series.len() == populated {
                series.push(0.0);
                track(0.0);
            }
        }
    }

    let (min_value, max_value) = range.unwrap_or((0.0, 0.0));
    result.time_begin = time_begin;
    result.time_end = time_end;
    result.slice_values = slice_values.into_iter().collect();
    result.values = values;
    result.min_value = min_value;
    result.max_value = max_value;

    info!(
        entries = timed.len(),
        buckets,
        series = result.values.len(),
        elapsed_us = start.elapsed().as_micros(),
        "moving aggregation computed"
    );
    Ok(result)
}

/// Copy of `entry` holding only the slice field and the aggregated field.
fn narrow(entry: &Entry, slice_field: Option<&str>, base: &str) -> Entry {
    let mut narrowed = Entry::new(entry.name.clone());
    for name in slice_field.into_iter().chain(std::iter::once(base)) {
        if let Some(field) = entry.metadata.get(name) {
            narrowed.metadata.insert(name.to_string(), field.clone());
        }
        if let Some(field) = entry.metrics.get(name) {
            narrowed.metrics.insert(name.to_string(), field.clone());
        }
    }
    narrowed
}

fn slice_label(value: Option<&Scalar>) -> String {
    value.map_or_else(|| NONE_LABEL.to_string(), Scalar::to_string)
}

/// Strip a trailing aggregation side channel from a field path.
pub fn base_field_name(field_name: &str) -> &str {
    [SUBFIELD_SAMPLES, SUBFIELD_MIN, SUBFIELD_MAX]
        .iter()
        .find_map(|sub| {
            field_name
                .strip_suffix(sub)
                .and_then(|rest| rest.strip_suffix('/'))
        })
        .unwrap_or(field_name)
}

/// Epoch milliseconds of an ISO 8601 timestamp. Naive times are taken as UTC.
pub fn parse_epoch_ms(value: &Scalar) -> Option<i64> {
    let text = value.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
