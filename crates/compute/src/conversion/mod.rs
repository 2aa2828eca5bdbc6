//! Entry conversions and the chain that composes them.
//!
//! Every stage takes an ordered entry sequence and returns one:
//!
//! - **categorize**: classify metadata fields (same/group/unique/timestamp).
//! - **filter**: keep entries passing every condition.
//! - **sort**: most recent first by a time field.
//! - **aggregate**: collapse groups of entries into one entry each.
//! - **pruning**: mark and remove low-information metrics.
//! - **rename**: align field names with the naming conventions.
//! - **round** / **ms_to_s**: value tuning.

pub mod aggregate;
pub mod categorize;
pub mod chains;
pub mod filter;
pub mod ms_to_s;
pub mod pruning;
pub mod rename;
pub mod round;
pub mod sort;

use std::time::Instant;

use tracing::debug;

use canon_core::{Entry, Result};

pub use aggregate::{AbsentMetricsPolicy, AggregateConversion};
pub use categorize::CategorizeConversion;
pub use chains::{create_aggregation, create_metrics_tuning, AggregationParams, MetricsTuneParams};
pub use filter::FilterConversion;
pub use ms_to_s::MsToSConversion;
pub use pruning::{DeterminePruningConversion, PruneConversion, PruneMode};
pub use rename::RenameConversion;
pub use round::RoundConversion;
pub use sort::SortByFieldConversion;

/// A single-input, single-output transformation over entries.
pub trait Conversion: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    fn convert(&self, entries: Vec<Entry>) -> Result<Vec<Entry>>;
}

/// Runs conversions strictly in order, each consuming the previous output.
///
/// An empty chain is the identity.
#[derive(Default)]
pub struct ChainConversion {
    stages: Vec<Box<dyn Conversion>>,
}

impl ChainConversion {
    pub fn new(stages: Vec<Box<dyn Conversion>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: impl Conversion + 'static) {
        self.stages.push(Box::new(stage));
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl Conversion for ChainConversion {
    fn name(&self) -> &str {
        "chain"
    }

    fn convert(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let mut current = entries;
        for stage in &self.stages {
            let start = Instant::now();
            let input = current.len();
            current = stage.convert(current)?;
            debug!(
                stage = stage.name(),
                input,
                output = current.len(),
                elapsed_us = start.elapsed().as_micros(),
                "conversion stage completed"
            );
        }
        Ok(current)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Suffix(&'static str);

    impl Conversion for Suffix {
        fn name(&self) -> &str {
            "suffix"
        }

        fn convert(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
            Ok(entries
                .into_iter()
                .map(|mut e| {
                    e.name.push_str(self.0);
                    e
                })
                .collect())
        }
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = ChainConversion::default();
        let input = vec![Entry::new("a"), Entry::new("b")];
        assert_eq!(chain.convert(input.clone()).unwrap(), input);
    }

    #[test]
    fn stages_run_in_order() {
        let mut chain = ChainConversion::default();
        chain.push(Suffix("-1"));
        chain.push(Suffix("-2"));
        assert_eq!(chain.stage_names(), vec!["suffix", "suffix"]);

        let out = chain.convert(vec![Entry::new("x")]).unwrap();
        assert_eq!(out[0].name, "x-1-2");
    }
}
