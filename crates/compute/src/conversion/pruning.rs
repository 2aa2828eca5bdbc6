//! Low-information metric detection and removal.
//!
//! Determination only sets `prune = true`; removal is a separate stage so a
//! batch can be inspected (or aggregated, which keeps a flag only when every
//! member shares it) before anything is dropped.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use canon_core::config::PruningConfig;
use canon_core::{Entry, Fields, Result, Scalar};

use super::Conversion;

const SUFFIX_ALL: &str = "_all";
const SUFFIX_SUCCESS: &str = "_success";
const SUFFIX_AVG: &str = "_avg";
const SUFFIX_MIN: &str = "_min";
const SUFFIX_MAX: &str = "_max";

/// Marks metrics that carry little information.
#[derive(Debug, Clone)]
pub struct DeterminePruningConversion {
    min_threshold: f64,
    min_variation_ratio: f64,
}

impl DeterminePruningConversion {
    pub fn new(config: &PruningConfig) -> Self {
        Self {
            min_threshold: config.min_threshold,
            min_variation_ratio: config.min_variation_ratio,
        }
    }

    /// Numeric metrics below the absolute threshold.
    fn below_threshold(&self, metrics: &Fields) -> Vec<String> {
        metrics
            .iter()
            .filter(|(_, field)| {
                field
                    .value()
                    .and_then(Scalar::as_f64)
                    .is_some_and(|v| v < self.min_threshold)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// `<base>_success` equal to `<base>_all` or `<base>`.
    fn trivial_success(&self, metrics: &Fields) -> Vec<String> {
        let mut totals: HashMap<&str, f64> = HashMap::new();
        for key in metrics.keys() {
            let Some(v) = numeric(metrics, key) else {
                continue;
            };
            totals.insert(key.as_str(), v);
            if let Some(base) = key.strip_suffix(SUFFIX_ALL) {
                totals.insert(base, v);
            }
        }

        metrics
            .keys()
            .filter_map(|key| {
                let base = key.strip_suffix(SUFFIX_SUCCESS)?;
                let success = numeric(metrics, key)?;
                let total = totals.get(base)?;
                (success == *total).then(|| key.clone())
            })
            .collect()
    }

    /// `<base>_min`/`<base>_max` within the variation ratio of `<base>_avg`.
    fn tight_spread(&self, metrics: &Fields) -> Vec<String> {
        let mut flagged = Vec::new();
        for key in metrics.keys() {
            let Some(base) = key.strip_suffix(SUFFIX_AVG) else {
                continue;
            };
            let Some(avg) = numeric(metrics, key).filter(|a| *a != 0.0) else {
                continue;
            };
            for suffix in [SUFFIX_MIN, SUFFIX_MAX] {
                let bound_key = format!("{base}{suffix}");
                if let Some(bound) = numeric(metrics, &bound_key) {
                    let variation = (avg - bound).abs() / avg.abs();
                    if variation < self.min_variation_ratio {
                        flagged.push(bound_key);
                    }
                }
            }
        }
        flagged
    }
}

fn numeric(metrics: &Fields, key: &str) -> Option<f64> {
    metrics.get(key)?.value().and_then(Scalar::as_f64)
}

impl Conversion for DeterminePruningConversion {
    fn name(&self) -> &str {
        "determine_pruning"
    }

    fn convert(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let mut marked = 0usize;
        for entry in &mut entries {
            let mut flagged = self.below_threshold(&entry.metrics);
            flagged.extend(self.trivial_success(&entry.metrics));
            flagged.extend(self.tight_spread(&entry.metrics));

            for key in flagged {
                if let Some(field) = entry.metrics.get_mut(&key) {
                    field.promote().prune = Some(true);
                    marked += 1;
                }
            }
        }
        debug!(entries = entries.len(), marked, "pruning determined");
        Ok(entries)
    }
}

/// Which flagged metrics get removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneMode {
    /// Keep everything.
    None,
    /// Drop every metric flagged in its own entry.
    #[serde(alias = "all")]
    Individual,
    /// Drop a metric only where every entry carrying it has it flagged.
    #[default]
    Column,
}

/// Removes metrics flagged for pruning.
#[derive(Debug, Clone, Copy)]
pub struct PruneConversion {
    mode: PruneMode,
}

impl PruneConversion {
    pub fn new(mode: PruneMode) -> Self {
        Self { mode }
    }
}

impl Conversion for PruneConversion {
    fn name(&self) -> &str {
        "prune"
    }

    fn convert(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        match self.mode {
            PruneMode::None => {}
            PruneMode::Individual => {
                for entry in &mut entries {
                    entry.metrics.retain(|_, field| !field.is_pruned());
                }
            }
            PruneMode::Column => {
                let columns = flagged_columns(&entries);
                debug!(columns = columns.len(), "pruning columns");
                for entry in &mut entries {
                    entry.metrics.retain(|key, _| !columns.contains(key));
                }
            }
        }
        Ok(entries)
    }
}

/// Metric keys flagged in every entry that carries them.
fn flagged_columns(entries: &[Entry]) -> HashSet<String> {
    let mut flagged: HashSet<String> = HashSet::new();
    let mut kept: HashSet<&str> = HashSet::new();
    for entry in entries {
        for (key, field) in &entry.metrics {
            if field.is_pruned() {
                flagged.insert(key.clone());
            } else {
                kept.insert(key);
            }
        }
    }
    flagged.retain(|key| !kept.contains(key.as_str()));
    flagged
}
