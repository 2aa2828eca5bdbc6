use tracing::debug;

use canon_core::{Entry, FieldValue, Fields, Result, Scalar};

use super::ms_to_s::substitute_token;
use super::Conversion;

/// Heuristic field renaming so names line up with the `_avg`/`_min`/`_max`
/// and `_all`/`_fail`/`_success` conventions the rest of the pipeline reads.
///
/// Metadata: the first unambiguous key containing all of a word set is moved
/// to the canonical time field, unless that field already holds a truthy value.
/// Metrics: percentage paths move under `performance/percentages/`, long
/// statistic and status words are shortened and leading ones move to the end
/// of their path segment (`avg_latency` becomes `latency_avg`).
#[derive(Debug, Default, Clone, Copy)]
pub struct RenameConversion;

impl Conversion for RenameConversion {
    fn name(&self) -> &str {
        "rename"
    }

    fn convert(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        for entry in &mut entries {
            rename_time_fields(&mut entry.metadata);
            let metrics = std::mem::take(&mut entry.metrics);
            entry.metrics = rename_metrics(metrics);
            entry.sort_fields();
        }
        Ok(entries)
    }
}

// ── Time fields ─────────────────────────────────────────────────────

/// Target field and the word sets tried for it, in order.
const TIME_FIELDS: &[(&str, &[&[&str]])] = &[
    (
        "time_begin_utc",
        &[
            &["time", "begin", "utc"],
            &["time", "start", "utc"],
            &["time", "begin"],
            &["time", "start"],
        ],
    ),
    (
        "time_begin_local",
        &[&["time", "begin", "local"], &["time", "start", "local"]],
    ),
    (
        "time_end_utc",
        &[
            &["time", "end", "utc"],
            &["time", "stop", "utc"],
            &["time", "end"],
            &["time", "stop"],
        ],
    ),
    ("time_end_local", &[&["time", "end", "local"]]),
];

fn rename_time_fields(metadata: &mut Fields) {
    for (target, word_sets) in TIME_FIELDS {
        let occupied = metadata
            .get(*target)
            .and_then(FieldValue::value)
            .is_some_and(Scalar::is_truthy);
        if occupied {
            continue;
        }
        let Some(candidate) = word_sets.iter().find_map(|words| find_key(metadata, words)) else {
            continue;
        };
        if candidate == *target {
            continue;
        }
        if let Some(field) = metadata.shift_remove(&candidate) {
            debug!(from = %candidate, to = *target, "renamed time field");
            metadata.insert(target.to_string(), field);
        }
    }
}

/// The only key containing every word; `None` when zero or several do.
fn find_key(fields: &Fields, words: &[&str]) -> Option<String> {
    let mut matching = fields
        .keys()
        .filter(|key| words.iter().all(|word| key.contains(word)));
    let first = matching.next()?;
    matching.next().is_none().then(|| first.clone())
}

// ── Metrics ─────────────────────────────────────────────────────────

const STAT_WORDS: &[(&str, &str)] = &[("average", "avg"), ("minimum", "min"), ("maximum", "max")];
const STATS: &[&str] = &["avg", "min", "max"];

const STATUS_WORDS: &[(&str, &str)] = &[
    ("total", "all"),
    ("failed", "fail"),
    ("failure", "fail"),
    ("failures", "fail"),
    ("successful", "success"),
];
const STATUSES: &[&str] = &["all", "fail", "success"];

fn rename_metrics(metrics: Fields) -> Fields {
    let mut out = Fields::with_capacity(metrics.len());
    for (key, field) in metrics {
        let renamed = rename_metric_key(&key);
        if renamed != key {
            debug!(from = %key, to = %renamed, "renamed metric");
        }
        out.insert(renamed, field);
    }
    out
}

fn rename_metric_key(key: &str) -> String {
    let key = rename_percentage(key);
    let key = normalize(&key, STAT_WORDS, STATS);
    // Twice, so two leading status words both move (`fail_success_count`).
    let key = normalize(&key, STATUS_WORDS, STATUSES);
    normalize(&key, STATUS_WORDS, STATUSES)
}

fn rename_percentage(key: &str) -> String {
    if key.starts_with("performance")
        && key.contains("percent")
        && !key.starts_with("performance/percentage")
    {
        key.replace("percentage", "percent")
            .replace("performance/", "performance/percentages/")
    } else {
        key.to_string()
    }
}

/// Shorten long words, then move a leading short word to the end of its segment.
fn normalize(key: &str, words: &[(&str, &str)], leading: &[&str]) -> String {
    let shortened = words
        .iter()
        .fold(key.to_string(), |text, (old, new)| substitute_token(&text, old, new));
    shortened
        .split('/')
        .map(|segment| match segment.split_once('_') {
            Some((head, rest)) if !rest.is_empty() && leading.contains(&head) => {
                format!("{rest}_{head}")
            }
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}
