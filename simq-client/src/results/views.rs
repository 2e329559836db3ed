//! Published result views
//!
//! Views are owned snapshots sent over `tokio::sync::watch` channels. The
//! container holds the senders; listeners hold receivers and only ever see the
//! latest published state.

use crate::scores::{MediaObjectScoreContainer, SegmentScoreContainer, WeightedFeatureCategory};
use serde::Serialize;
use simq_common::messages::MediaType;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// Segment as shown in a ranked view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedSegment {
    pub segment_id: String,
    pub object_id: String,
    pub mediatype: Option<MediaType>,
    pub score: f64,
    pub sequence_number: u32,
    pub start: i64,
    pub end: i64,
    pub startabs: f64,
    pub endabs: f64,
    pub metadata: BTreeMap<String, String>,
}

impl RankedSegment {
    pub(crate) fn new(segment: &SegmentScoreContainer, object: &MediaObjectScoreContainer) -> Self {
        Self {
            segment_id: segment.segment_id.clone(),
            object_id: segment.object_id.clone(),
            mediatype: object.mediatype,
            score: segment.score,
            sequence_number: segment.sequence_number,
            start: segment.start,
            end: segment.end,
            startabs: segment.startabs,
            endabs: segment.endabs,
            metadata: segment.metadata.clone(),
        }
    }
}

/// Object as shown in the ranked object view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedObject {
    pub object_id: String,
    pub name: Option<String>,
    pub path: Option<String>,
    pub mediatype: Option<MediaType>,
    pub content_url: Option<String>,
    pub score: f64,
    /// Owned segment ids, in attachment order
    pub segment_ids: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl RankedObject {
    pub(crate) fn new(object: &MediaObjectScoreContainer, segment_ids: Vec<String>) -> Self {
        Self {
            object_id: object.object_id.clone(),
            name: object.name.clone(),
            path: object.path.clone(),
            mediatype: object.mediatype,
            content_url: object.content_url.clone(),
            score: object.score,
            segment_ids,
            metadata: object.metadata.clone(),
        }
    }
}

/// Sending half of every view channel
#[derive(Debug)]
pub(crate) struct ViewSenders {
    pub segments: watch::Sender<Vec<RankedSegment>>,
    pub overview: watch::Sender<Vec<RankedSegment>>,
    pub cluster: watch::Sender<Vec<RankedSegment>>,
    pub objects: watch::Sender<Vec<RankedObject>>,
    pub features: watch::Sender<Vec<WeightedFeatureCategory>>,
}

impl ViewSenders {
    pub fn new() -> Self {
        Self {
            segments: watch::channel(Vec::new()).0,
            overview: watch::channel(Vec::new()).0,
            cluster: watch::channel(Vec::new()).0,
            objects: watch::channel(Vec::new()).0,
            features: watch::channel(Vec::new()).0,
        }
    }

    pub fn subscribe(&self) -> ViewReceivers {
        ViewReceivers {
            segments: self.segments.subscribe(),
            overview: self.overview.subscribe(),
            cluster: self.cluster.subscribe(),
            objects: self.objects.subscribe(),
            features: self.features.subscribe(),
        }
    }
}

/// Receiving half of every view channel
///
/// A receiver observes `changed()` returning an error once the container is
/// completed or dropped.
#[derive(Debug, Clone)]
pub struct ViewReceivers {
    pub segments: watch::Receiver<Vec<RankedSegment>>,
    pub overview: watch::Receiver<Vec<RankedSegment>>,
    pub cluster: watch::Receiver<Vec<RankedSegment>>,
    pub objects: watch::Receiver<Vec<RankedObject>>,
    pub features: watch::Receiver<Vec<WeightedFeatureCategory>>,
}

/// Sort by descending score; equal scores keep their relative order
pub(crate) fn rank<T>(items: &mut [T], score: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_is_descending_and_stable() {
        let mut items = vec![("a", 0.1), ("b", 0.5), ("c", 0.1), ("d", 0.9)];
        rank(&mut items, |item| item.1);
        let order: Vec<&str> = items.iter().map(|item| item.0).collect();
        assert_eq!(order, vec!["d", "b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_dropping_senders_closes_receivers() {
        let senders = ViewSenders::new();
        let mut receivers = senders.subscribe();
        drop(senders);
        assert!(receivers.segments.changed().await.is_err());
    }
}
