//! Grouped entry listing: each group summarized by one aggregated entry,
//! with its members kept alongside.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use canon_core::{Condition, EngineConfig, Entry, Result};

use crate::conversion::aggregate::group_entries;
use crate::conversion::sort::descending_missing_last;
use crate::conversion::{
    AbsentMetricsPolicy, AggregateConversion, CategorizeConversion, ChainConversion, Conversion,
    FilterConversion, PruneConversion, PruneMode, RoundConversion, SortByFieldConversion,
};
use crate::recommend::{recommend_slices, GroupsRecommendationStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedEntries {
    pub aggregate: Entry,
    /// Members, most recent first.
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedList {
    pub groups: Vec<GroupedEntries>,
    pub group_recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListParams {
    pub filters: Vec<Condition>,
    pub groups: Vec<Condition>,
    pub prune_mode: PruneMode,
    pub groups_recommendation_strategy: GroupsRecommendationStrategy,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            groups: Vec::new(),
            prune_mode: PruneMode::Individual,
            groups_recommendation_strategy: GroupsRecommendationStrategy::Concise,
        }
    }
}

/// Group entries by `params.groups`, most recent group first.
///
/// Each group's summary is an aggregation without slices; prune mode applies
/// to the summary and to the members, and both are returned with `prune` and
/// `category` stripped and value-only fields flattened.
pub fn create_grouped_list(
    entries: Vec<Entry>,
    params: &ListParams,
    config: &EngineConfig,
) -> Result<GroupedList> {
    let start = Instant::now();

    let mut pre = ChainConversion::default();
    pre.push(CategorizeConversion);
    if !params.filters.is_empty() {
        pre.push(FilterConversion::new(params.filters.clone()));
    }
    pre.push(SortByFieldConversion::by_time(config));
    let entries = pre.convert(entries)?;

    let group_recommendations = recommend_slices(
        &entries,
        &params.groups,
        params.groups_recommendation_strategy,
    )?;

    let prune = (params.prune_mode != PruneMode::None).then(|| PruneConversion::new(params.prune_mode));
    let mut summarize = ChainConversion::default();
    summarize.push(AggregateConversion::new(
        Vec::new(),
        AbsentMetricsPolicy::AllOrNothing,
    ));
    if let Some(prune) = prune {
        summarize.push(prune);
    }
    summarize.push(RoundConversion::new(config.round_precision));

    let mut groups = Vec::new();
    for members in group_entries(entries, &params.groups)?.into_values() {
        let Some(aggregate) = summarize.convert(members.clone())?.into_iter().next() else {
            continue;
        };
        let members = match &prune {
            Some(prune) => prune.convert(members)?,
            None => members,
        };
        groups.push(GroupedEntries {
            aggregate,
            entries: members,
        });
    }

    groups.sort_by(|a, b| {
        descending_missing_last(
            a.aggregate.fetch(&config.time.aggregated_field).as_ref(),
            b.aggregate.fetch(&config.time.aggregated_field).as_ref(),
        )
    });

    for group in &mut groups {
        for entry in std::iter::once(&mut group.aggregate).chain(group.entries.iter_mut()) {
            entry.remove_subfields();
            entry.flatten_values();
        }
    }

    info!(
        groups = groups.len(),
        recommendations = group_recommendations.len(),
        elapsed_us = start.elapsed().as_micros(),
        "grouped list created"
    );
    Ok(GroupedList {
        groups,
        group_recommendations,
    })
}
