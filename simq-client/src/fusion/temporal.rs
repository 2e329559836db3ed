//! Temporal fusion
//!
//! A staged query lists its query containers in the order the user expects the
//! matches to appear in the media. An object scores well when, for successive
//! containers, it has matching segments that also occur one after another.
//!
//! Alignment policy:
//! - a segment's per-container score is the normalised weighted category score
//! - a segment scores its best container
//! - an object scores its best chain: at most one segment per container, containers
//!   in ascending order, segment positions strictly ascending (by absolute start,
//!   then sequence number). Containers may be skipped; the chain total is divided
//!   by the container count, so skipping costs score.

use super::{weighted_score, FusionFunction};
use crate::scores::{SegmentScoreContainer, WeightedFeatureCategory};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Fusion that rewards in-order matches across query containers
#[derive(Debug, Clone, Copy)]
pub struct TemporalFusionFunction {
    container_count: usize,
}

impl TemporalFusionFunction {
    /// `container_count` is fixed when the query is issued
    pub fn new(container_count: usize) -> Self {
        Self { container_count }
    }

    pub fn container_count(&self) -> usize {
        self.container_count
    }

    /// Divisor for chain totals; observations beyond the announced count still
    /// take part
    fn divisor(&self, observed: &BTreeSet<u32>) -> f64 {
        let highest = observed.iter().next_back().map_or(0, |id| *id as usize + 1);
        self.container_count.max(highest).max(1) as f64
    }
}

impl Default for TemporalFusionFunction {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Per-container scores of a segment, only for containers it was observed in
fn container_scores(
    categories: &[WeightedFeatureCategory],
    segment: &SegmentScoreContainer,
) -> BTreeMap<u32, f64> {
    segment
        .containers()
        .map(|(id, values)| (id, weighted_score(categories, values)))
        .collect()
}

fn by_position(a: &&SegmentScoreContainer, b: &&SegmentScoreContainer) -> Ordering {
    a.startabs
        .partial_cmp(&b.startabs)
        .unwrap_or(Ordering::Equal)
        .then(a.sequence_number.cmp(&b.sequence_number))
        .then(a.start.cmp(&b.start))
}

impl FusionFunction for TemporalFusionFunction {
    fn name(&self) -> &'static str {
        "TEMPORAL"
    }

    fn score_for_segment(
        &self,
        categories: &[WeightedFeatureCategory],
        segment: &SegmentScoreContainer,
    ) -> f64 {
        container_scores(categories, segment)
            .into_values()
            .fold(0.0_f64, f64::max)
    }

    fn score_for_object(
        &self,
        categories: &[WeightedFeatureCategory],
        segments: &[&SegmentScoreContainer],
    ) -> f64 {
        if segments.is_empty() {
            return 0.0;
        }

        let mut ordered: Vec<&SegmentScoreContainer> = segments.to_vec();
        ordered.sort_by(by_position);

        let per_segment: Vec<BTreeMap<u32, f64>> = ordered
            .iter()
            .map(|segment| container_scores(categories, segment))
            .collect();
        let observed: BTreeSet<u32> = per_segment
            .iter()
            .flat_map(|scores| scores.keys().copied())
            .collect();

        // best[j]: best chain ending at segment j using containers seen so far.
        // Containers nobody was observed in cannot extend a chain, so only the
        // observed ids are visited, in ascending order.
        let mut best = vec![0.0_f64; ordered.len()];
        for container in &observed {
            let mut prefix = 0.0_f64;
            let mut ending_here = vec![0.0_f64; ordered.len()];
            for (j, scores) in per_segment.iter().enumerate() {
                let own = scores.get(container).copied().unwrap_or(0.0);
                if own > 0.0 {
                    ending_here[j] = own + prefix;
                }
                prefix = prefix.max(best[j]);
            }
            for (slot, candidate) in best.iter_mut().zip(ending_here) {
                *slot = slot.max(candidate);
            }
        }

        best.into_iter().fold(0.0_f64, f64::max) / self.divisor(&observed)
    }
}
