//! Prebuilt conversion chains.

use canon_core::{Condition, EngineConfig};

use super::{
    AbsentMetricsPolicy, AggregateConversion, CategorizeConversion, ChainConversion,
    DeterminePruningConversion, FilterConversion, MsToSConversion, PruneConversion, PruneMode,
    RenameConversion, RoundConversion, SortByFieldConversion,
};

/// Options for [`create_aggregation`].
#[derive(Debug, Clone)]
pub struct AggregationParams {
    pub filters: Vec<Condition>,
    pub slices: Vec<Condition>,
    pub prune_mode: PruneMode,
    pub categorize_metadata: bool,
    pub absent_metrics_policy: AbsentMetricsPolicy,
    pub round: bool,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            slices: Vec::new(),
            prune_mode: PruneMode::None,
            categorize_metadata: true,
            absent_metrics_policy: AbsentMetricsPolicy::AllOrNothing,
            round: true,
        }
    }
}

/// categorize → filter → sort by time → aggregate → sort by aggregated time → prune → round.
///
/// Entries are sorted most recent first before aggregation so the latest
/// member of each group serves as the template for copied annotations.
pub fn create_aggregation(params: &AggregationParams, config: &EngineConfig) -> ChainConversion {
    let mut chain = ChainConversion::default();

    if params.categorize_metadata {
        chain.push(CategorizeConversion);
    }
    if !params.filters.is_empty() {
        chain.push(FilterConversion::new(params.filters.clone()));
    }
    chain.push(SortByFieldConversion::by_time(config));
    chain.push(AggregateConversion::new(
        params.slices.clone(),
        params.absent_metrics_policy,
    ));
    chain.push(SortByFieldConversion::by_aggregated_time(config));
    if params.prune_mode != PruneMode::None {
        chain.push(PruneConversion::new(params.prune_mode));
    }
    if params.round {
        chain.push(RoundConversion::new(config.round_precision));
    }
    chain
}

/// Options for [`create_metrics_tuning`].
#[derive(Debug, Clone, Copy)]
pub struct MetricsTuneParams {
    pub rename: bool,
    pub ms_to_s: bool,
    pub round: bool,
    pub determine_pruning: bool,
}

impl Default for MetricsTuneParams {
    fn default() -> Self {
        Self {
            rename: false,
            ms_to_s: false,
            round: true,
            determine_pruning: true,
        }
    }
}

/// rename → ms-to-s → round → determine pruning, each optional.
pub fn create_metrics_tuning(params: &MetricsTuneParams, config: &EngineConfig) -> ChainConversion {
    let mut chain = ChainConversion::default();
    if params.rename {
        chain.push(RenameConversion);
    }
    if params.ms_to_s {
        chain.push(MsToSConversion);
    }
    if params.round {
        chain.push(RoundConversion::new(config.round_precision));
    }
    if params.determine_pruning {
        chain.push(DeterminePruningConversion::new(&config.pruning));
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::test_support::{entry, metric_annotation, num, text};
    use crate::conversion::Conversion;
    use canon_core::parse_conditions;

    #[test]
    fn aggregation_chain_stage_order() {
        let params = AggregationParams {
            filters: parse_conditions("agent:in:a"),
            prune_mode: PruneMode::Column,
            ..Default::default()
        };
        let chain = create_aggregation(&params, &EngineConfig::default());
        assert_eq!(
            chain.stage_names(),
            vec!["categorize", "filter", "sort", "aggregate", "sort", "prune", "round"]
        );

        let minimal = AggregationParams {
            categorize_metadata: false,
            round: false,
            ..Default::default()
        };
        assert_eq!(
            create_aggregation(&minimal, &EngineConfig::default()).stage_names(),
            vec!["sort", "aggregate", "sort"]
        );
    }

    #[test]
    fn aggregation_chain_end_to_end() {
        let entries = vec![
            entry(
                "1",
                &[("agent", text("a")), ("time_end_utc", text("2025-01-01T00:00:00"))],
                &[("score", 1.0 / 3.0)],
            ),
            entry(
                "2",
                &[("agent", text("a")), ("time_end_utc", text("2025-01-02T00:00:00"))],
                &[("score", 1.0)],
            ),
            entry(
                "3",
                &[("agent", text("b")), ("time_end_utc", text("2025-01-03T00:00:00"))],
                &[("score", 0.5)],
            ),
        ];
        let params = AggregationParams {
            slices: parse_conditions("agent"),
            ..Default::default()
        };
        let out = create_aggregation(&params, &EngineConfig::default())
            .convert(entries)
            .unwrap();
        let names: Vec<_> = out.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["agent_b", "agent_a"]);
        assert_eq!(metric_annotation(&out[1], "score").value, num(0.67));
    }

    #[test]
    fn tuning_chain_stage_order() {
        let params = MetricsTuneParams {
            ms_to_s: true,
            ..Default::default()
        };
        let chain = create_metrics_tuning(&params, &EngineConfig::default());
        assert_eq!(
            chain.stage_names(),
            vec!["ms_to_s", "round", "determine_pruning"]
        );
    }

    #[test]
    fn tuning_chain_with_rename() {
        let params = MetricsTuneParams {
            rename: true,
            ms_to_s: true,
            determine_pruning: false,
            ..Default::default()
        };
        let chain = create_metrics_tuning(&params, &EngineConfig::default());
        assert_eq!(chain.stage_names(), vec!["rename", "ms_to_s", "round"]);

        let out = chain
            .convert(vec![entry("1", &[], &[("avg_latency_ms", 1234.0)])])
            .unwrap();
        let latency = out[0].metrics.get("latency_s_avg").and_then(|f| f.value().cloned());
        assert_eq!(latency, num(1.23));
    }
}
