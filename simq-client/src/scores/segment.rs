//! Per-segment score container

use crate::fusion::FusionFunction;
use crate::scores::WeightedFeatureCategory;
use simq_common::messages::{MediaSegment, SegmentType};
use std::collections::{BTreeMap, HashMap};

/// Similarity observations and cached score of one segment
///
/// `object` is the arena slot of the owning object (a back-reference, the object
/// registry owns the object).
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentScoreContainer {
    pub segment_id: String,
    pub object_id: String,
    pub object: usize,
    /// Result kind of the fragment that introduced the segment; fixed for life
    pub kind: SegmentType,
    pub start: i64,
    pub end: i64,
    pub startabs: f64,
    pub endabs: f64,
    pub count: u32,
    pub sequence_number: u32,
    /// container id → (category name → similarity)
    scores: BTreeMap<u32, HashMap<String, f64>>,
    pub metadata: BTreeMap<String, String>,
    pub score: f64,
}

impl SegmentScoreContainer {
    pub fn new(segment: &MediaSegment, object: usize, kind: SegmentType) -> Self {
        let mut container = Self {
            segment_id: segment.segment_id.clone(),
            object_id: segment.object_id.clone(),
            object,
            kind,
            start: 0,
            end: 0,
            startabs: 0.0,
            endabs: 0.0,
            count: 0,
            sequence_number: 0,
            scores: BTreeMap::new(),
            metadata: BTreeMap::new(),
            score: 0.0,
        };
        container.apply(segment);
        container
    }

    /// Refresh descriptive fields from a (re-)delivered descriptor
    pub fn apply(&mut self, segment: &MediaSegment) {
        self.start = segment.start;
        self.end = segment.end;
        self.startabs = segment.startabs;
        self.endabs = segment.endabs;
        self.count = segment.count;
        self.sequence_number = segment.sequence_number;
    }

    /// Record a similarity value; a repeated (container, category) pair overwrites
    pub fn add_similarity(&mut self, category: &str, value: f64, container_id: u32) {
        self.scores
            .entry(container_id)
            .or_default()
            .insert(category.to_string(), value);
    }

    pub fn similarity(&self, container_id: u32, category: &str) -> Option<f64> {
        self.scores.get(&container_id)?.get(category).copied()
    }

    /// Observations grouped by container, in container order
    pub fn containers(&self) -> impl Iterator<Item = (u32, &HashMap<String, f64>)> {
        self.scores.iter().map(|(id, values)| (*id, values))
    }

    /// Number of (container, category) observations
    pub fn observation_count(&self) -> usize {
        self.scores.values().map(HashMap::len).sum()
    }

    pub fn has_observations(&self) -> bool {
        self.scores.values().any(|values| !values.is_empty())
    }

    /// Recompute the cached score
    pub fn update(&mut self, categories: &[WeightedFeatureCategory], fusion: &dyn FusionFunction) {
        self.score = fusion.score_for_segment(categories, self);
    }

    /// Descriptor form, as delivered by the far end
    pub fn to_descriptor(&self) -> MediaSegment {
        MediaSegment {
            segment_id: self.segment_id.clone(),
            object_id: self.object_id.clone(),
            start: self.start,
            end: self.end,
            startabs: self.startabs,
            endabs: self.endabs,
            count: self.count,
            sequence_number: self.sequence_number,
        }
    }
}
