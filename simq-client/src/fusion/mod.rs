//! Score fusion
//!
//! A fusion function turns the weighted per-category similarity observations of a
//! segment into a single score, and reduces the segments of an object into the
//! object's score. Functions are plain values handed to the results container;
//! they can be swapped mid-session.
//!
//! Three functions are available, selected by case-insensitive name:
//! - `AVERAGE`: weighted mean over categories and query containers
//! - `MAXPOOL`: per-category maximum over containers, weighted sum
//! - `TEMPORAL`: rewards objects whose per-stage matches occur in stage order

mod average;
mod maxpool;
mod temporal;

pub use average::AverageFusionFunction;
pub use maxpool::MaxpoolFusionFunction;
pub use temporal::TemporalFusionFunction;

use crate::scores::{SegmentScoreContainer, WeightedFeatureCategory};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Pluggable scoring strategy
pub trait FusionFunction: Send + Sync + fmt::Debug {
    /// Stable name, round-trips through [`ScoreFunction`]
    fn name(&self) -> &'static str;

    /// Score of one segment from its own observations
    fn score_for_segment(
        &self,
        categories: &[WeightedFeatureCategory],
        segment: &SegmentScoreContainer,
    ) -> f64;

    /// Score of an object from the observations of its segments
    fn score_for_object(
        &self,
        categories: &[WeightedFeatureCategory],
        segments: &[&SegmentScoreContainer],
    ) -> f64;
}

/// Unknown score function name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown score function: {0}")]
pub struct UnknownScoreFunction(pub String);

/// Names of the available fusion functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreFunction {
    Average,
    Maxpool,
    Temporal,
}

impl ScoreFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreFunction::Average => "AVERAGE",
            ScoreFunction::Maxpool => "MAXPOOL",
            ScoreFunction::Temporal => "TEMPORAL",
        }
    }

    /// Instantiate the function; `container_count` is the number of query
    /// containers (stages) of the issued query and only matters for `Temporal`
    pub fn build(self, container_count: usize) -> Arc<dyn FusionFunction> {
        match self {
            ScoreFunction::Average => Arc::new(AverageFusionFunction),
            ScoreFunction::Maxpool => Arc::new(MaxpoolFusionFunction),
            ScoreFunction::Temporal => Arc::new(TemporalFusionFunction::new(container_count)),
        }
    }
}

impl fmt::Display for ScoreFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreFunction {
    type Err = UnknownScoreFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AVERAGE" => Ok(ScoreFunction::Average),
            "MAXPOOL" => Ok(ScoreFunction::Maxpool),
            "TEMPORAL" => Ok(ScoreFunction::Temporal),
            _ => Err(UnknownScoreFunction(s.to_string())),
        }
    }
}

/// Sum of the weights of `categories`
pub(crate) fn total_weight(categories: &[WeightedFeatureCategory]) -> f64 {
    categories.iter().map(|c| c.weight).sum()
}

/// Normalised weighted sum of one container's category values
///
/// Categories without an observation contribute 0. Returns 0 when the weights
/// sum to 0.
pub(crate) fn weighted_score(
    categories: &[WeightedFeatureCategory],
    values: &HashMap<String, f64>,
) -> f64 {
    let total = total_weight(categories);
    if total <= 0.0 {
        return 0.0;
    }
    categories
        .iter()
        .map(|c| c.weight * values.get(&c.name).copied().unwrap_or(0.0))
        .sum::<f64>()
        / total
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use simq_common::messages::{MediaSegment, SegmentType};

    pub fn categories(entries: &[(&str, f64)]) -> Vec<WeightedFeatureCategory> {
        entries
            .iter()
            .map(|(name, weight)| WeightedFeatureCategory::new(*name, *weight))
            .collect()
    }

    /// Segment with observations given as (container, category, value)
    pub fn segment(id: &str, sequence_number: u32, observations: &[(u32, &str, f64)]) -> SegmentScoreContainer {
        let mut descriptor = MediaSegment::new(id, "o1");
        descriptor.sequence_number = sequence_number;
        descriptor.startabs = sequence_number as f64;
        let mut segment = SegmentScoreContainer::new(&descriptor, 0, SegmentType::Default);
        for (container, category, value) in observations {
            segment.add_similarity(category, *value, *container);
        }
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_function_from_str_is_case_insensitive() {
        assert_eq!("average".parse::<ScoreFunction>(), Ok(ScoreFunction::Average));
        assert_eq!("MaxPool".parse::<ScoreFunction>(), Ok(ScoreFunction::Maxpool));
        assert_eq!(" TEMPORAL ".parse::<ScoreFunction>(), Ok(ScoreFunction::Temporal));
        assert_eq!(
            "median".parse::<ScoreFunction>(),
            Err(UnknownScoreFunction("median".to_string()))
        );
    }

    #[test]
    fn test_built_function_name_round_trips() {
        for function in [ScoreFunction::Average, ScoreFunction::Maxpool, ScoreFunction::Temporal] {
            let built = function.build(1);
            assert_eq!(built.name().parse::<ScoreFunction>(), Ok(function));
        }
    }

    #[test]
    fn test_weighted_score_normalises_weights() {
        let categories = test_support::categories(&[("color", 300.0), ("edge", 100.0)]);
        let values = HashMap::from([("color".to_string(), 1.0), ("edge".to_string(), 0.0)]);
        assert!((weighted_score(&categories, &values) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_zero_weights() {
        let categories = test_support::categories(&[("color", 0.0)]);
        let values = HashMap::from([("color".to_string(), 1.0)]);
        assert_eq!(weighted_score(&categories, &values), 0.0);
    }
}
