//! Slice (group) recommendation.
//!
//! Finds group-category metadata fields that would split the current groups
//! further, then reduces them to a set where every field adds discriminating
//! power on top of the ones accepted before it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use canon_core::condition::slice_condition;
use canon_core::{Category, Condition, Entry, Result, Scalar, FILES_FIELD};

use crate::conversion::aggregate::{slice_key, SliceKey};

const VERSION_MARKER: &str = "_version";
const VERSION_PENALTY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupsRecommendationStrategy {
    /// No recommendations.
    None,
    /// Try candidates in alphabetical order.
    FirstAlphabetical,
    /// Try short, non-versioned candidates first.
    #[default]
    Concise,
}

/// Metadata fields that split at least one current group, sorted by name.
///
/// Only annotated `group`-category fields are considered, and none that
/// already appear in `groups` under any operator. Without current groups
/// every candidate qualifies.
pub fn determine_possible_new_groups(entries: &[Entry], groups: &[Condition]) -> Result<Vec<String>> {
    let grouped: HashSet<&str> = groups.iter().map(Condition::field_name).collect();
    let mut accepted: Vec<String> = Vec::new();
    let mut decided: HashSet<&str> = HashSet::new();
    let mut first_seen: HashMap<(&str, SliceKey), Option<&Scalar>> = HashMap::new();

    for entry in entries {
        let key = slice_key(entry, groups)?;
        for (name, field) in &entry.metadata {
            if name == FILES_FIELD || field.category() != Some(Category::Group) {
                continue;
            }
            if decided.contains(name.as_str()) {
                continue;
            }
            if groups.is_empty() {
                decided.insert(name.as_str());
                accepted.push(name.clone());
                continue;
            }
            if grouped.contains(name.as_str()) {
                decided.insert(name.as_str());
                continue;
            }

            let value = field.value();
            match first_seen.get(&(name.as_str(), key.clone())) {
                None | Some(None) => {
                    first_seen.insert((name.as_str(), key.clone()), value);
                }
                Some(seen) if *seen == value => {}
                Some(_) => {
                    decided.insert(name.as_str());
                    accepted.push(name.clone());
                }
            }
        }
    }

    accepted.sort();
    Ok(accepted)
}

/// Reduce alphabetically sorted candidates to a non-redundant set.
///
/// A candidate is kept when, under the composite key of the candidates kept
/// so far, it takes at least two different values. `entries` are expected in
/// preference order (most recent first); `Concise` uses the first value seen
/// to rank candidates.
pub fn dedupe_groups(
    candidates: &[String],
    entries: &[Entry],
    strategy: GroupsRecommendationStrategy,
) -> Result<Vec<String>> {
    let mut ordered: Vec<&String> = match strategy {
        GroupsRecommendationStrategy::None => return Ok(Vec::new()),
        GroupsRecommendationStrategy::FirstAlphabetical => candidates.iter().collect(),
        GroupsRecommendationStrategy::Concise => {
            let mut ordered: Vec<&String> = candidates.iter().collect();
            ordered.sort_by_cached_key(|name| concise_rank(name, entries));
            ordered
        }
    };

    if ordered.is_empty() {
        return Ok(Vec::new());
    }
    let first = ordered.remove(0);
    let mut kept = vec![first.clone()];
    let mut conditions = vec![slice_condition(first)?];

    for candidate in ordered {
        let mut seen: HashMap<SliceKey, Option<Scalar>> = HashMap::new();
        for entry in entries {
            let key = slice_key(entry, &conditions)?;
            let value = entry.fetch(candidate);
            match seen.get(&key) {
                None | Some(None) => {
                    seen.insert(key, value);
                }
                Some(previous) if *previous == value => {}
                Some(_) => {
                    kept.push(candidate.clone());
                    conditions.push(slice_condition(candidate)?);
                    break;
                }
            }
        }
    }

    debug!(candidates = candidates.len(), kept = kept.len(), "groups deduped");
    Ok(kept)
}

fn concise_rank(name: &str, entries: &[Entry]) -> usize {
    let penalty = if name.contains(VERSION_MARKER) {
        VERSION_PENALTY
    } else {
        0
    };
    let value_len = entries
        .iter()
        .find_map(|e| e.fetch(name))
        .map_or(0, |v| v.to_string().chars().count());
    name.chars().count() + penalty + value_len
}

/// Candidates for additional slices, reduced with `strategy`.
pub fn recommend_slices(
    entries: &[Entry],
    current: &[Condition],
    strategy: GroupsRecommendationStrategy,
) -> Result<Vec<String>> {
    if strategy == GroupsRecommendationStrategy::None {
        return Ok(Vec::new());
    }
    let candidates = determine_possible_new_groups(entries, current)?;
    dedupe_groups(&candidates, entries, strategy)
}
