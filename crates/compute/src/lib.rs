pub mod cache;
pub mod conversion;
pub mod grouped;
pub mod moving;
pub mod recommend;
pub mod table;

pub use cache::{EntryCache, EntryLoader};
pub use conversion::{
    create_aggregation, create_metrics_tuning, AbsentMetricsPolicy, AggregationParams, ChainConversion,
    Conversion, MetricsTuneParams, PruneMode,
};
pub use grouped::{create_grouped_list, GroupedEntries, GroupedList, ListParams};
pub use moving::{moving_aggregation, MovingAggregation, MovingAggregationParams};
pub use recommend::{recommend_slices, GroupsRecommendationStrategy};
pub use table::{
    build_evaluation_table, build_table, ColumnTree, EvaluationTableParams, SortOrder, Table,
    TableParams,
};
