//! Maxpool fusion

use super::{total_weight, FusionFunction};
use crate::scores::{SegmentScoreContainer, WeightedFeatureCategory};

/// Per-category maximum across query containers, combined by weighted sum
///
/// An object scores its best segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxpoolFusionFunction;

impl FusionFunction for MaxpoolFusionFunction {
    fn name(&self) -> &'static str {
        "MAXPOOL"
    }

    fn score_for_segment(
        &self,
        categories: &[WeightedFeatureCategory],
        segment: &SegmentScoreContainer,
    ) -> f64 {
        let total = total_weight(categories);
        if total <= 0.0 {
            return 0.0;
        }
        categories
            .iter()
            .map(|category| {
                let best = segment
                    .containers()
                    .filter_map(|(_, values)| values.get(&category.name).copied())
                    .fold(0.0_f64, f64::max);
                category.weight * best
            })
            .sum::<f64>()
            / total
    }

    fn score_for_object(
        &self,
        categories: &[WeightedFeatureCategory],
        segments: &[&SegmentScoreContainer],
    ) -> f64 {
        segments
            .iter()
            .map(|segment| self.score_for_segment(categories, segment))
            .fold(0.0_f64, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::test_support::{categories, segment};

    #[test]
    fn test_takes_best_container_per_category() {
        let categories = categories(&[("color", 100.0), ("edge", 100.0)]);
        let s1 = segment(
            "s1",
            0,
            &[
                (0, "color", 0.2),
                (1, "color", 0.9),
                (0, "edge", 0.5),
                (1, "edge", 0.1),
            ],
        );
        // (0.9 + 0.5) / 2
        let score = MaxpoolFusionFunction.score_for_segment(&categories, &s1);
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_weights_shift_the_sum() {
        let categories = categories(&[("color", 300.0), ("edge", 100.0)]);
        let s1 = segment("s1", 0, &[(0, "color", 0.4), (0, "edge", 0.8)]);
        // (300 * 0.4 + 100 * 0.8) / 400
        let score = MaxpoolFusionFunction.score_for_segment(&categories, &s1);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_object_is_best_segment() {
        let categories = categories(&[("color", 100.0)]);
        let s1 = segment("s1", 0, &[(0, "color", 0.3)]);
        let s2 = segment("s2", 1, &[(0, "color", 0.6)]);
        let score = MaxpoolFusionFunction.score_for_object(&categories, &[&s1, &s2]);
        assert!((score - 0.6).abs() < 1e-9);
    }
}
