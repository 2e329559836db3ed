//! Score containers
//!
//! Mutable per-object and per-segment aggregates that collect similarity
//! observations and hold the score last computed by a fusion function.

mod object;
mod registry;
mod segment;

pub use object::MediaObjectScoreContainer;
pub use registry::Registry;
pub use segment::SegmentScoreContainer;

use serde::{Deserialize, Serialize};

/// Weight a newly observed category starts with
pub const DEFAULT_CATEGORY_WEIGHT: f64 = 100.0;

/// Named scoring dimension with an adjustable weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedFeatureCategory {
    pub name: String,
    pub readable_name: String,
    pub weight: f64,
}

impl WeightedFeatureCategory {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        let name = name.into();
        Self {
            readable_name: name.clone(),
            name,
            weight,
        }
    }
}
