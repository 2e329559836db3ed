//! Average fusion

use super::{weighted_score, FusionFunction};
use crate::scores::{SegmentScoreContainer, WeightedFeatureCategory};

/// Weighted mean of similarities across categories and query containers
///
/// Each container the segment was observed in contributes its normalised weighted
/// category score; the segment score is the mean over those containers. An object
/// scores the mean of its segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageFusionFunction;

impl FusionFunction for AverageFusionFunction {
    fn name(&self) -> &'static str {
        "AVERAGE"
    }

    fn score_for_segment(
        &self,
        categories: &[WeightedFeatureCategory],
        segment: &SegmentScoreContainer,
    ) -> f64 {
        let mut sum = 0.0;
        let mut containers = 0usize;
        for (_, values) in segment.containers() {
            sum += weighted_score(categories, values);
            containers += 1;
        }
        if containers == 0 {
            0.0
        } else {
            sum / containers as f64
        }
    }

    fn score_for_object(
        &self,
        categories: &[WeightedFeatureCategory],
        segments: &[&SegmentScoreContainer],
    ) -> f64 {
        if segments.is_empty() {
            return 0.0;
        }
        segments
            .iter()
            .map(|segment| self.score_for_segment(categories, segment))
            .sum::<f64>()
            / segments.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::test_support::{categories, segment};

    #[test]
    fn test_single_observation_is_its_own_score() {
        let categories = categories(&[("color", 100.0)]);
        let s1 = segment("s1", 0, &[(0, "color", 0.8)]);
        let score = AverageFusionFunction.score_for_segment(&categories, &s1);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_mean_over_categories_and_containers() {
        let categories = categories(&[("color", 100.0), ("edge", 100.0)]);
        // container 0: (0.8 + 0.4) / 2 = 0.6, container 1: (0.2 + 0.0) / 2 = 0.1
        let s1 = segment(
            "s1",
            0,
            &[(0, "color", 0.8), (0, "edge", 0.4), (1, "color", 0.2)],
        );
        let score = AverageFusionFunction.score_for_segment(&categories, &s1);
        assert!((score - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_no_observations_scores_zero() {
        let categories = categories(&[("color", 100.0)]);
        let s1 = segment("s1", 0, &[]);
        assert_eq!(AverageFusionFunction.score_for_segment(&categories, &s1), 0.0);
        assert_eq!(AverageFusionFunction.score_for_object(&categories, &[]), 0.0);
    }

    #[test]
    fn test_object_is_mean_of_segments() {
        let categories = categories(&[("color", 100.0)]);
        let s1 = segment("s1", 0, &[(0, "color", 0.9)]);
        let s2 = segment("s2", 1, &[(0, "color", 0.3)]);
        let score = AverageFusionFunction.score_for_object(&categories, &[&s1, &s2]);
        assert!((score - 0.6).abs() < 1e-9);
    }
}
