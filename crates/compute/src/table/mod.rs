//! Pivoted tables over aggregated entries.
//!
//! Row 0 is the header. Every other row starts with a label cell built from
//! the entry's metadata, followed by one cell per selected column. Cells hold
//! a `values` map for sorting and display next to a `details` map with the
//! full field provenance.

pub mod column_tree;

use std::cmp::Ordering;
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use canon_core::field::{SUBFIELD_CATEGORY, SUBFIELD_MAX, SUBFIELD_MIN, SUBFIELD_PRUNE, SUBFIELD_VALUE};
use canon_core::{
    Category, Condition, EngineConfig, EngineError, Entry, FieldValue, Fields, Result, Scalar,
};

use crate::conversion::{
    create_aggregation, AbsentMetricsPolicy, AggregationParams, CategorizeConversion,
    ChainConversion, Conversion, FilterConversion, PruneMode, SortByFieldConversion,
};
use crate::recommend::{recommend_slices, GroupsRecommendationStrategy};

pub use column_tree::{
    display_name, ColumnNode, ColumnTree, SelectionState, TableColumn, TableColumnUnit,
    METADATA_PREFIX, METRICS_PREFIX,
};

pub type CellMap = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column_id: String,
    pub sort_order: SortOrder,
}

impl SortSpec {
    pub fn new(column_id: impl Into<String>, sort_order: SortOrder) -> Self {
        Self {
            column_id: column_id.into(),
            sort_order,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableCell {
    pub values: CellMap,
    pub details: CellMap,
}

impl TableCell {
    fn header(column: &TableColumn) -> Self {
        let mut cell = TableCell::default();
        cell.values
            .insert(SUBFIELD_VALUE.into(), Value::String(column.name.clone()));
        cell.details
            .insert("name".into(), Value::String(column.name.clone()));
        cell.details.insert(
            "description".into(),
            column.description.clone().map_or(Value::Null, Value::String),
        );
        cell
    }

    /// Row label: `values` keeps metadata of `category`, `details` keeps all of it.
    fn label(entry: &Entry, category: Category) -> Self {
        let mut cell = TableCell::default();
        for (key, field) in &entry.metadata {
            if field.category() == Some(category) {
                cell.values.insert(key.clone(), field_json(field));
            }
            cell.details.insert(key.clone(), field_json(field));
        }
        cell
    }

    fn data(entry: &Entry, column: &TableColumn, with_range: bool) -> Self {
        let mut cell = TableCell::default();
        let Some(fields) = column_fields(entry, &column.column_id) else {
            return cell;
        };
        let name = column.name.as_str();

        match fields.get(name) {
            Some(FieldValue::Annotated(a)) => {
                insert_scalar(&mut cell.values, SUBFIELD_VALUE, a.value.as_ref());
                if with_range {
                    insert_scalar(&mut cell.values, SUBFIELD_MIN, a.min_value.as_ref());
                    insert_scalar(&mut cell.values, SUBFIELD_MAX, a.max_value.as_ref());
                }
                if let Ok(Value::Object(map)) = serde_json::to_value(a) {
                    cell.details = map.into_iter().collect();
                }
                cell.details
                    .insert("name".into(), Value::String(name.to_string()));
            }
            Some(field) => {
                let value = field_json(field);
                cell.values.insert(SUBFIELD_VALUE.into(), value.clone());
                cell.details.insert(SUBFIELD_VALUE.into(), value);
            }
            None => {
                if let Some(value) = canon_core::entry::fetch_value(fields, name) {
                    let value = scalar_json(&value);
                    cell.values.insert(SUBFIELD_VALUE.into(), value.clone());
                    cell.details.insert(SUBFIELD_VALUE.into(), value);
                }
            }
        }
        cell
    }

    /// Drop `prune`/`category` from nested objects and collapse `{value}` objects.
    pub fn tidy(&mut self) {
        tidy_map(&mut self.values);
        tidy_map(&mut self.details);
    }

    /// The value rows are sorted by: `value`, falling back to `max_value`.
    pub fn sort_value(&self) -> Option<&Value> {
        [SUBFIELD_VALUE, SUBFIELD_MAX]
            .into_iter()
            .filter_map(|key| self.values.get(key))
            .find(|v| !v.is_null())
    }
}

fn field_json(field: &FieldValue) -> Value {
    serde_json::to_value(field).unwrap_or(Value::Null)
}

fn scalar_json(value: &Scalar) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn insert_scalar(map: &mut CellMap, key: &str, value: Option<&Scalar>) {
    if let Some(value) = value {
        map.insert(key.to_string(), scalar_json(value));
    }
}

fn tidy_map(map: &mut CellMap) {
    for value in map.values_mut() {
        let Value::Object(object) = value else {
            continue;
        };
        object.remove(SUBFIELD_PRUNE);
        object.remove(SUBFIELD_CATEGORY);
        if object.len() == 1 {
            if let Some(inner) = object.remove(SUBFIELD_VALUE) {
                *value = inner;
            }
        }
    }
}

/// The field map a column id points into.
fn column_fields<'a>(entry: &'a Entry, column_id: &str) -> Option<&'a Fields> {
    if column_id.starts_with(METADATA_PREFIX) {
        Some(&entry.metadata)
    } else if column_id.starts_with(METRICS_PREFIX) {
        Some(&entry.metrics)
    } else {
        None
    }
}

/// Infer a column's unit from the first entry carrying a value for it.
///
/// Timestamp metadata (and its `min_value`/`max_value` side channels) is a
/// timestamp column; otherwise numbers are numerical and the rest strings.
pub fn determine_column_unit(column_id: &str, entries: &[Entry]) -> TableColumnUnit {
    let name = display_name(column_id);
    for entry in entries {
        let Some(fields) = column_fields(entry, column_id) else {
            continue;
        };
        if column_id.starts_with(METADATA_PREFIX) && is_timestamp_field(fields, name) {
            return TableColumnUnit::Timestamp;
        }
        if let Some(value) = canon_core::entry::fetch_value(fields, name) {
            return if value.is_number() {
                TableColumnUnit::Numerical
            } else {
                TableColumnUnit::String
            };
        }
    }
    TableColumnUnit::String
}

fn is_timestamp_field(fields: &Fields, name: &str) -> bool {
    let field = fields.get(name).or_else(|| {
        let (parent, subfield) = name.rsplit_once('/')?;
        if subfield == SUBFIELD_MIN || subfield == SUBFIELD_MAX {
            fields.get(parent)
        } else {
            None
        }
    });
    field.and_then(FieldValue::category) == Some(Category::Timestamp)
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    /// `rows[0]` holds the column headers; its first cell is empty.
    pub rows: Vec<Vec<TableCell>>,
    pub column_tree: ColumnTree,
    pub columns: Vec<TableColumn>,
    pub filters: Vec<Condition>,
    pub slices: Vec<Condition>,
    pub slice_recommendations: Vec<String>,
    pub sorted_by: Option<SortSpec>,
}

impl Table {
    /// The `values` map of every cell, header and row labels included.
    pub fn values(&self) -> Vec<Vec<&CellMap>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|cell| &cell.values).collect())
            .collect()
    }

    /// Number of data rows, excluding the header.
    pub fn row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// Sort data rows by a selected column.
    ///
    /// Numbers come first, then strings, then anything else; rows without a
    /// value always sort last. The order only reverses within each tier.
    pub fn sort_rows(&mut self, column_id: &str, order: SortOrder) -> Result<()> {
        let position = self
            .columns
            .iter()
            .position(|c| c.column_id == column_id)
            .ok_or_else(|| EngineError::ColumnNotFound(column_id.to_string()))?;
        // Row labels occupy the first cell.
        let index = position + 1;

        if self.rows.len() > 1 {
            let mut data = self.rows.split_off(1);
            data.sort_by(|a, b| {
                compare_cells(
                    a.get(index).and_then(TableCell::sort_value),
                    b.get(index).and_then(TableCell::sort_value),
                    order,
                )
            });
            self.rows.extend(data);
        }
        self.sorted_by = Some(SortSpec::new(column_id, order));
        Ok(())
    }

    fn tidy(&mut self) {
        for cell in self.rows.iter_mut().flatten() {
            cell.tidy();
        }
    }
}

fn tier(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::Number(_)) => 0,
        Some(Value::String(_)) => 1,
        Some(_) => 2,
        None => 3,
    }
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>, order: SortOrder) -> Ordering {
    tier(a).cmp(&tier(b)).then_with(|| {
        let within = match (a, b) {
            (Some(Value::Number(x)), Some(Value::Number(y))) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
            (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
            _ => Ordering::Equal,
        };
        match order {
            SortOrder::Asc => within,
            SortOrder::Desc => within.reverse(),
        }
    })
}

// ── Building ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableParams {
    pub filters: Vec<Condition>,
    pub slices: Vec<Condition>,
    /// Column node ids (leaves or categories) to show.
    pub column_selections: Vec<String>,
    /// Applied after `column_selections`.
    pub selections_to_add: Vec<String>,
    /// Applied last.
    pub selections_to_remove: Vec<String>,
    pub sort_by: Option<SortSpec>,
    pub prune_mode: PruneMode,
    pub absent_metrics_policy: AbsentMetricsPolicy,
    pub slices_recommendation_strategy: GroupsRecommendationStrategy,
}

impl Default for TableParams {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            slices: Vec::new(),
            column_selections: Vec::new(),
            selections_to_add: Vec::new(),
            selections_to_remove: Vec::new(),
            sort_by: None,
            prune_mode: PruneMode::Column,
            absent_metrics_policy: AbsentMetricsPolicy::AllOrNothing,
            slices_recommendation_strategy: GroupsRecommendationStrategy::Concise,
        }
    }
}

/// Aggregate `entries` by the requested slices and tabulate the result.
///
/// Fails only on a sort column that is not among the selected columns.
pub fn build_table(entries: Vec<Entry>, params: &TableParams, config: &EngineConfig) -> Result<Table> {
    let start = Instant::now();
    let input = entries.len();

    let entries = preprocess(entries, &params.filters, Some(config))?;
    let slice_recommendations =
        recommend_slices(&entries, &params.slices, params.slices_recommendation_strategy)?;

    let aggregation = AggregationParams {
        filters: Vec::new(),
        slices: params.slices.clone(),
        prune_mode: params.prune_mode,
        categorize_metadata: false,
        absent_metrics_policy: params.absent_metrics_policy,
        round: true,
    };
    let aggregated = create_aggregation(&aggregation, config).convert(entries)?;

    let (column_tree, columns) = select_columns(
        &aggregated,
        &params.column_selections,
        &params.selections_to_add,
        &params.selections_to_remove,
    );
    let rows = build_rows(&aggregated, &columns, Category::Group, true);

    let mut table = Table {
        rows,
        column_tree,
        columns,
        filters: params.filters.clone(),
        slices: params.slices.clone(),
        slice_recommendations,
        sorted_by: None,
    };
    if let Some(spec) = &params.sort_by {
        table.sort_rows(&spec.column_id, spec.sort_order)?;
    }
    table.tidy();

    info!(
        entries = input,
        rows = table.row_count(),
        columns = table.columns.len(),
        elapsed_us = start.elapsed().as_micros(),
        "table built"
    );
    Ok(table)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationTableParams {
    pub filters: Vec<Condition>,
    pub column_selections: Vec<String>,
    pub selections_to_add: Vec<String>,
    pub selections_to_remove: Vec<String>,
    pub sort_by: Option<SortSpec>,
}

/// Tabulate entries one row each, without aggregation.
///
/// Rows are labelled by their unique-valued metadata, which is what tells
/// individual evaluation results apart.
pub fn build_evaluation_table(entries: Vec<Entry>, params: &EvaluationTableParams) -> Result<Table> {
    let start = Instant::now();
    let entries = preprocess(entries, &params.filters, None)?;

    let (column_tree, columns) = select_columns(
        &entries,
        &params.column_selections,
        &params.selections_to_add,
        &params.selections_to_remove,
    );
    let rows = build_rows(&entries, &columns, Category::Unique, false);

    let mut table = Table {
        rows,
        column_tree,
        columns,
        filters: params.filters.clone(),
        slices: Vec::new(),
        slice_recommendations: Vec::new(),
        sorted_by: None,
    };
    if let Some(spec) = &params.sort_by {
        table.sort_rows(&spec.column_id, spec.sort_order)?;
    }
    table.tidy();

    info!(
        rows = table.row_count(),
        columns = table.columns.len(),
        elapsed_us = start.elapsed().as_micros(),
        "evaluation table built"
    );
    Ok(table)
}

/// categorize → filter → (sort by time when a config is given).
fn preprocess(
    entries: Vec<Entry>,
    filters: &[Condition],
    sort: Option<&EngineConfig>,
) -> Result<Vec<Entry>> {
    let mut chain = ChainConversion::default();
    chain.push(CategorizeConversion);
    if !filters.is_empty() {
        chain.push(FilterConversion::new(filters.to_vec()));
    }
    if let Some(config) = sort {
        chain.push(SortByFieldConversion::by_time(config));
    }
    chain.convert(entries)
}

fn select_columns(
    entries: &[Entry],
    selections: &[String],
    to_add: &[String],
    to_remove: &[String],
) -> (ColumnTree, Vec<TableColumn>) {
    let mut tree = ColumnTree::build(entries);
    tree.add_selection(selections);
    if !to_add.is_empty() {
        tree.add_selection(to_add);
    }
    if !to_remove.is_empty() {
        tree.remove_selection(to_remove);
    }

    let mut columns = tree.selection();
    for column in &mut columns {
        column.unit = Some(determine_column_unit(&column.column_id, entries));
    }
    debug!(nodes = tree.len(), columns = columns.len(), "columns selected");
    (tree, columns)
}

fn build_rows(
    entries: &[Entry],
    columns: &[TableColumn],
    label_category: Category,
    with_range: bool,
) -> Vec<Vec<TableCell>> {
    let header: Vec<TableCell> = std::iter::once(TableCell::default())
        .chain(columns.iter().map(TableCell::header))
        .collect();

    std::iter::once(header)
        .chain(entries.iter().map(|entry| {
            std::iter::once(TableCell::label(entry, label_category))
                .chain(
                    columns
                        .iter()
                        .map(|column| TableCell::data(entry, column, with_range)),
                )
                .collect::<Vec<_>>()
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_core::{parse_conditions, Annotated};
    use serde_json::json;

    fn run(agent: &str, model: &str, time: &str, latency: f64) -> Entry {
        Entry::new(format!("{agent}-{time}"))
            .with_metadata("agent", agent)
            .with_metadata("model", model)
            .with_metadata("time_end_utc", time)
            .with_metric("latency", latency)
    }

    fn runs() -> Vec<Entry> {
        vec![
            run("a", "m1", "2025-01-01T00:00:00", 10.0),
            run("a", "m2", "2025-01-02T00:00:00", 20.0),
            run("b", "m1", "2025-01-03T00:00:00", 5.0),
        ]
    }

    fn params(selections: &[&str]) -> TableParams {
        TableParams {
            slices: parse_conditions("agent"),
            column_selections: selections.iter().map(|s| s.to_string()).collect(),
            prune_mode: PruneMode::None,
            ..Default::default()
        }
    }

    #[test]
    fn builds_header_and_aggregated_rows() {
        let table = build_table(
            runs(),
            &params(&["/metrics/latency"]),
            &EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][1].values["value"], json!("latency"));

        // Most recent group first.
        let b = &table.rows[1];
        assert_eq!(b[0].values["agent"], json!("b"));
        assert_eq!(b[1].values["value"], json!(5.0));

        let a = &table.rows[2];
        assert_eq!(a[1].values["value"], json!(15.0));
        assert_eq!(a[1].values["min_value"], json!(10.0));
        assert_eq!(a[1].values["max_value"], json!(20.0));
        assert_eq!(a[1].details["name"], json!("latency"));
        assert_eq!(a[1].details["n_samples"], json!(2));
        assert_eq!(table.columns[0].unit, Some(TableColumnUnit::Numerical));
    }

    #[test]
    fn label_cell_is_tidied() {
        let table = build_table(
            runs(),
            &params(&["/metrics/latency"]),
            &EngineConfig::default(),
        )
        .unwrap();
        // Group-category metadata collapses to its bare value once the
        // category channel is stripped.
        let label = &table.rows[2][0];
        assert_eq!(label.values["agent"], json!("a"));
        assert_eq!(label.details["agent"], json!("a"));
        assert!(!label.values.contains_key("model"));
    }

    #[test]
    fn sorting_by_column() {
        let mut p = params(&["/metrics/latency"]);
        p.sort_by = Some(SortSpec::new("/metrics/latency", SortOrder::Desc));
        let table = build_table(runs(), &p, &EngineConfig::default()).unwrap();
        assert_eq!(table.rows[1][1].values["value"], json!(15.0));
        assert_eq!(table.rows[2][1].values["value"], json!(5.0));
        assert_eq!(
            table.sorted_by,
            Some(SortSpec::new("/metrics/latency", SortOrder::Desc))
        );
    }

    #[test]
    fn unknown_sort_column_fails() {
        let mut p = params(&["/metrics/latency"]);
        p.sort_by = Some(SortSpec::new("/metrics/nope", SortOrder::Asc));
        let err = build_table(runs(), &p, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::ColumnNotFound(_)));
    }

    fn cell(value: Value) -> TableCell {
        let mut c = TableCell::default();
        c.values.insert("value".into(), value);
        c
    }

    fn sorted(cells: Vec<TableCell>, order: SortOrder) -> Vec<Value> {
        let mut table = Table {
            rows: std::iter::once(vec![TableCell::default(), TableCell::default()])
                .chain(cells.into_iter().map(|c| vec![TableCell::default(), c]))
                .collect(),
            column_tree: ColumnTree::build(&[]),
            columns: vec![TableColumn {
                column_id: "/metrics/x".into(),
                name: "x".into(),
                description: None,
                unit: None,
            }],
            filters: Vec::new(),
            slices: Vec::new(),
            slice_recommendations: Vec::new(),
            sorted_by: None,
        };
        table.sort_rows("/metrics/x", order).unwrap();
        table.rows[1..]
            .iter()
            .map(|row| row[1].sort_value().cloned().unwrap_or(Value::Null))
            .collect()
    }

    #[test]
    fn tiers_keep_missing_last_in_both_directions() {
        let cells = || {
            vec![
                TableCell::default(),
                cell(json!("beta")),
                cell(json!(2.0)),
                cell(json!(true)),
                cell(json!(10.0)),
                cell(json!("alpha")),
            ]
        };
        assert_eq!(
            sorted(cells(), SortOrder::Asc),
            vec![json!(2.0), json!(10.0), json!("alpha"), json!("beta"), json!(true), Value::Null]
        );
        assert_eq!(
            sorted(cells(), SortOrder::Desc),
            vec![json!(10.0), json!(2.0), json!("beta"), json!("alpha"), json!(true), Value::Null]
        );
    }

    #[test]
    fn max_value_backs_missing_value() {
        let mut c = TableCell::default();
        c.values.insert("max_value".into(), json!("2025-01-02"));
        assert_eq!(c.sort_value(), Some(&json!("2025-01-02")));
    }

    #[test]
    fn column_units() {
        let stamp = Annotated {
            value: None,
            category: Some(Category::Timestamp),
            max_value: Some(Scalar::from("2025-01-02T00:00:00")),
            ..Default::default()
        };
        let entries = vec![Entry::new("e")
            .with_metadata("time_end_utc", stamp)
            .with_metadata("agent", "a")
            .with_metric("score", 1.0)];
        assert_eq!(
            determine_column_unit("/metadata/time_end_utc/max_value", &entries),
            TableColumnUnit::Timestamp
        );
        assert_eq!(
            determine_column_unit("/metadata/agent", &entries),
            TableColumnUnit::String
        );
        assert_eq!(
            determine_column_unit("/metrics/score", &entries),
            TableColumnUnit::Numerical
        );
        assert_eq!(
            determine_column_unit("/metrics/missing", &entries),
            TableColumnUnit::String
        );
    }

    #[test]
    fn evaluation_table_keeps_one_row_per_entry() {
        let entries: Vec<Entry> = runs()
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.with_metadata("run_id", format!("run-{i}").as_str()))
            .collect();
        let table = build_evaluation_table(
            entries,
            &EvaluationTableParams {
                column_selections: vec!["/metrics/".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(table.row_count(), 3);

        // Row labels come from unique-valued metadata.
        let label = &table.rows[1][0];
        assert_eq!(label.values["run_id"], json!("run-0"));
        assert!(!label.values.contains_key("agent"));
        assert_eq!(label.details["agent"], json!("a"));

        assert_eq!(table.rows[1][1].values["value"], json!(10.0));
        assert!(!table.rows[1][1].values.contains_key("min_value"));
    }

    #[test]
    fn values_grid_matches_rows() {
        let table = build_table(
            runs(),
            &params(&["/metrics/latency"]),
            &EngineConfig::default(),
        )
        .unwrap();
        let grid = table.values();
        assert_eq!(grid.len(), table.rows.len());
        assert!(grid[0][0].is_empty());
    }
}
