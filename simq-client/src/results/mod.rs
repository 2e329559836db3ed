//! Results aggregation
//!
//! [`ResultsContainer`] owns every object and segment score container of one
//! query session, ingests result fragments in any order, and publishes ranked
//! views over `watch` channels.
//!
//! Ingestion never recomputes scores. It only marks work as pending: a re-rank
//! (scores may have changed) or a publish (only presentation changed). The owner
//! drives [`ResultsContainer::check_update`] from a periodic tick; a burst of
//! fragments that saturates the pending counter is deferred to the next tick so
//! a streaming result set is re-ranked once, not once per fragment.

mod snapshot;
mod views;

pub use snapshot::{ResultsSnapshot, SimilarityRecord};
pub use views::{RankedObject, RankedSegment, ViewReceivers};

use crate::fusion::FusionFunction;
use crate::scores::{
    MediaObjectScoreContainer, Registry, SegmentScoreContainer, WeightedFeatureCategory,
    DEFAULT_CATEGORY_WEIGHT,
};
use simq_common::messages::{
    MediaSegment, MediaType, ObjectMetadataQueryResult, ObjectQueryResult, SegmentMetadataQueryResult,
    SegmentQueryResult, SegmentType, Similarity, SimilarityQueryResult,
};
use snapshot::{metadata_name, split_metadata_name};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};
use views::{rank, ViewSenders};

/// Pending-mark count at which a tick defers work to the next tick
pub const SATURATION_THRESHOLD: u32 = 100;

/// What a debounce check did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Scores recomputed and views published
    Reranked,
    /// Views published without recomputing scores
    Published,
    /// Pending work saturated; counter reset so the next tick performs it
    Deferred,
    /// Nothing pending
    Idle,
}

/// Aggregated results of one query session
#[derive(Debug)]
pub struct ResultsContainer {
    query_id: String,
    objects: Registry<MediaObjectScoreContainer>,
    segments: Registry<SegmentScoreContainer>,
    default_view: Vec<usize>,
    overview_view: Vec<usize>,
    cluster_view: Vec<usize>,
    cluster_members: HashSet<usize>,
    features: Vec<WeightedFeatureCategory>,
    mediatypes: BTreeMap<MediaType, bool>,
    fusion: Arc<dyn FusionFunction>,
    container_count: usize,
    rerank_pending: u32,
    publish_pending: u32,
    /// `None` once completed
    views: Option<ViewSenders>,
}

impl ResultsContainer {
    /// Create an empty container for session `query_id`
    ///
    /// `container_count` is the number of query containers (stages) of the issued
    /// query; it is carried into snapshots.
    pub fn new(
        query_id: impl Into<String>,
        fusion: Arc<dyn FusionFunction>,
        container_count: usize,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            objects: Registry::new(),
            segments: Registry::new(),
            default_view: Vec::new(),
            overview_view: Vec::new(),
            cluster_view: Vec::new(),
            cluster_members: HashSet::new(),
            features: Vec::new(),
            mediatypes: BTreeMap::new(),
            fusion,
            container_count,
            rerank_pending: 0,
            publish_pending: 0,
            views: Some(ViewSenders::new()),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Fragments for other sessions are stale and dropped
    fn accepts(&self, query_id: &str) -> bool {
        if query_id == self.query_id {
            return true;
        }
        debug!(
            query_id = %query_id,
            active = %self.query_id,
            "Dropping fragment for inactive session"
        );
        false
    }

    fn visibility(&self, mediatype: Option<MediaType>) -> bool {
        mediatype
            .and_then(|mediatype| self.mediatypes.get(&mediatype).copied())
            .unwrap_or(true)
    }

    fn object_slot(&mut self, object_id: &str) -> usize {
        self.objects
            .get_or_insert_with(object_id, |_| MediaObjectScoreContainer::new(object_id))
            .0
    }

    /// Register a category on first observation; returns true when new
    fn ensure_feature(&mut self, name: &str) -> bool {
        if self.features.iter().any(|feature| feature.name == name) {
            return false;
        }
        self.features
            .push(WeightedFeatureCategory::new(name, DEFAULT_CATEGORY_WEIGHT));
        true
    }

    /// Ingest object descriptors
    pub fn process_object_message(&mut self, message: &ObjectQueryResult) -> bool {
        if !self.accepts(&message.query_id) {
            return false;
        }
        for descriptor in &message.content {
            if let Some(mediatype) = descriptor.mediatype {
                self.mediatypes.entry(mediatype).or_insert(true);
            }
            let slot = self.object_slot(&descriptor.object_id);
            let visible = self.visibility(descriptor.mediatype);
            let object = self.objects.at_mut(slot);
            object.apply(descriptor);
            object.show = visible;
        }
        self.rerank_pending += 1;
        trace!(
            query_id = %self.query_id,
            count = message.content.len(),
            "Processed object fragment"
        );
        true
    }

    /// Ingest segment descriptors of one result kind
    ///
    /// A segment joins the view of the kind that first introduced it and never
    /// moves. The one exception is the cluster view: a cluster segment removed by
    /// [`clear_cluster_view`](Self::clear_cluster_view) rejoins it when a later
    /// cluster lookup delivers it again.
    pub fn process_segment_message(&mut self, message: &SegmentQueryResult) -> bool {
        if !self.accepts(&message.query_id) {
            return false;
        }
        let kind = message.segment_type;
        let mut added = 0usize;
        for descriptor in &message.content {
            let object_slot = self.object_slot(&descriptor.object_id);
            let (slot, created) = self
                .segments
                .get_or_insert_with(&descriptor.segment_id, |_| {
                    SegmentScoreContainer::new(descriptor, object_slot, kind)
                });
            if !created {
                self.segments.at_mut(slot).apply(descriptor);
            }
            let owner = self.segments.at(slot).object;
            self.objects.at_mut(owner).attach_segment(slot);

            if created {
                added += 1;
                match kind {
                    SegmentType::Default => {
                        self.default_view.push(slot);
                        self.rerank_pending += 1;
                    }
                    SegmentType::SomOverview => {
                        self.overview_view.push(slot);
                        self.publish_pending += 1;
                    }
                    SegmentType::SomCluster => {
                        self.cluster_view.push(slot);
                        self.cluster_members.insert(slot);
                        self.publish_pending += 1;
                    }
                }
            } else if kind == SegmentType::SomCluster
                && self.segments.at(slot).kind == SegmentType::SomCluster
                && self.cluster_members.insert(slot)
            {
                added += 1;
                self.cluster_view.push(slot);
                self.publish_pending += 1;
            }
        }
        trace!(
            query_id = %self.query_id,
            kind = ?kind,
            count = message.content.len(),
            added,
            "Processed segment fragment"
        );
        true
    }

    /// Ingest similarity values of one category for one query container
    ///
    /// Values for segments not yet described are dropped.
    pub fn process_similarity_message(&mut self, message: &SimilarityQueryResult) -> bool {
        if !self.accepts(&message.query_id) {
            return false;
        }
        let category = message.category.as_str();
        self.ensure_feature(category);
        let mut dropped = 0usize;
        for similarity in &message.content {
            match self.segments.get_mut(&similarity.key) {
                Some(segment) => segment.add_similarity(category, similarity.value, message.container_id),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            trace!(
                query_id = %self.query_id,
                category = %category,
                dropped,
                "Dropped similarities for unknown segments"
            );
        }
        self.rerank_pending += 1;
        true
    }

    pub fn process_object_metadata_message(&mut self, message: &ObjectMetadataQueryResult) -> bool {
        if !self.accepts(&message.query_id) {
            return false;
        }
        let mut dropped = 0usize;
        for record in &message.content {
            match self.objects.get_mut(&record.object_id) {
                Some(object) => {
                    object
                        .metadata
                        .insert(metadata_name(&record.domain, &record.key), record.value.clone());
                }
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            trace!(query_id = %self.query_id, dropped, "Dropped metadata for unknown objects");
        }
        self.publish_pending += 1;
        true
    }

    pub fn process_segment_metadata_message(&mut self, message: &SegmentMetadataQueryResult) -> bool {
        if !self.accepts(&message.query_id) {
            return false;
        }
        let mut dropped = 0usize;
        for record in &message.content {
            match self.segments.get_mut(&record.segment_id) {
                Some(segment) => {
                    segment
                        .metadata
                        .insert(metadata_name(&record.domain, &record.key), record.value.clone());
                }
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            trace!(query_id = %self.query_id, dropped, "Dropped metadata for unknown segments");
        }
        self.publish_pending += 1;
        true
    }

    /// Debounced update, called once per tick
    pub fn check_update(&mut self) -> UpdateOutcome {
        if self.rerank_pending > 0 {
            if self.rerank_pending < SATURATION_THRESHOLD {
                self.rerank(None, None);
                return UpdateOutcome::Reranked;
            }
            debug!(
                query_id = %self.query_id,
                pending = self.rerank_pending,
                "Re-rank saturated, deferring to next tick"
            );
            self.rerank_pending = 1;
            return UpdateOutcome::Deferred;
        }
        if self.publish_pending > 0 {
            if self.publish_pending < SATURATION_THRESHOLD {
                self.publish();
                return UpdateOutcome::Published;
            }
            debug!(
                query_id = %self.query_id,
                pending = self.publish_pending,
                "Publish saturated, deferring to next tick"
            );
            self.publish_pending = 1;
            return UpdateOutcome::Deferred;
        }
        UpdateOutcome::Idle
    }

    /// Perform pending work now, regardless of saturation
    pub fn do_update(&mut self) -> UpdateOutcome {
        if self.rerank_pending > 0 {
            self.rerank(None, None);
            UpdateOutcome::Reranked
        } else if self.publish_pending > 0 {
            self.publish();
            UpdateOutcome::Published
        } else {
            UpdateOutcome::Idle
        }
    }

    /// Recompute every score and publish
    ///
    /// `categories` and `fusion` default to the container's own.
    pub fn rerank(
        &mut self,
        categories: Option<&[WeightedFeatureCategory]>,
        fusion: Option<Arc<dyn FusionFunction>>,
    ) {
        let started = Instant::now();
        let categories = categories.map_or_else(|| self.features.clone(), <[_]>::to_vec);
        let fusion = fusion.unwrap_or_else(|| Arc::clone(&self.fusion));

        for object in self.objects.iter_mut() {
            let owned: Vec<&SegmentScoreContainer> = object
                .segments()
                .iter()
                .map(|&slot| self.segments.at(slot))
                .collect();
            object.score = fusion.score_for_object(&categories, &owned);
        }
        for segment in self.segments.iter_mut() {
            segment.update(&categories, fusion.as_ref());
        }
        self.rerank_pending = 0;
        self.publish();

        debug!(
            query_id = %self.query_id,
            fusion = fusion.name(),
            objects = self.objects.len(),
            segments = self.segments.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Re-ranked results"
        );
    }

    fn ranked_segments(&self, slots: &[usize]) -> Vec<RankedSegment> {
        let mut view: Vec<RankedSegment> = slots
            .iter()
            .map(|&slot| self.segments.at(slot))
            .filter_map(|segment| {
                let object = self.objects.at(segment.object);
                object.show.then(|| RankedSegment::new(segment, object))
            })
            .collect();
        rank(&mut view, |segment| segment.score);
        view
    }

    fn ranked_objects(&self) -> Vec<RankedObject> {
        let mut view: Vec<RankedObject> = self
            .objects
            .iter()
            .filter(|object| object.show)
            .map(|object| {
                let segment_ids = object
                    .segments()
                    .iter()
                    .map(|&slot| self.segments.at(slot).segment_id.clone())
                    .collect();
                RankedObject::new(object, segment_ids)
            })
            .collect();
        rank(&mut view, |object| object.score);
        view
    }

    /// Send the current visible views to subscribers
    pub fn publish(&mut self) {
        self.publish_pending = 0;
        let Some(views) = &self.views else {
            return;
        };
        views.segments.send_replace(self.ranked_segments(&self.default_view));
        views.overview.send_replace(self.ranked_segments(&self.overview_view));
        views.cluster.send_replace(self.ranked_segments(&self.cluster_view));
        views.objects.send_replace(self.ranked_objects());
        views.features.send_replace(self.features.clone());
    }

    /// Show or hide every object of a media type; unknown types are ignored
    pub fn toggle_mediatype(&mut self, mediatype: MediaType, visible: bool) -> bool {
        match self.mediatypes.get_mut(&mediatype) {
            Some(flag) => *flag = visible,
            None => return false,
        }
        for object in self.objects.iter_mut() {
            if object.mediatype == Some(mediatype) {
                object.show = visible;
            }
        }
        self.publish();
        true
    }

    pub fn clear_cluster_view(&mut self) {
        self.cluster_view.clear();
        self.cluster_members.clear();
        self.publish();
    }

    /// Swap the fusion function and re-rank
    pub fn set_fusion(&mut self, fusion: Arc<dyn FusionFunction>) {
        self.fusion = fusion;
        self.rerank(None, None);
    }

    pub fn fusion(&self) -> &Arc<dyn FusionFunction> {
        &self.fusion
    }

    /// Adjust a category weight; false for unknown categories
    pub fn set_category_weight(&mut self, name: &str, weight: f64) -> bool {
        match self.features.iter_mut().find(|feature| feature.name == name) {
            Some(feature) => {
                feature.weight = weight;
                self.rerank_pending += 1;
                true
            }
            None => false,
        }
    }

    /// Close every publication channel
    pub fn complete(&mut self) {
        if self.views.take().is_some() {
            debug!(query_id = %self.query_id, "Closed result views");
        }
    }

    pub fn is_completed(&self) -> bool {
        self.views.is_none()
    }

    /// Receivers for every view; `None` once completed
    pub fn subscribe(&self) -> Option<ViewReceivers> {
        self.views.as_ref().map(ViewSenders::subscribe)
    }

    /// Number of default-view segments
    pub fn segment_count(&self) -> usize {
        self.default_view.len()
    }

    pub fn overview_count(&self) -> usize {
        self.overview_view.len()
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_view.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn segment(&self, segment_id: &str) -> Option<&SegmentScoreContainer> {
        self.segments.get(segment_id)
    }

    pub fn object(&self, object_id: &str) -> Option<&MediaObjectScoreContainer> {
        self.objects.get(object_id)
    }

    /// Owning object of a segment
    pub fn object_of_segment(&self, segment_id: &str) -> Option<&MediaObjectScoreContainer> {
        self.segment(segment_id)
            .map(|segment| self.objects.at(segment.object))
    }

    pub fn features(&self) -> &[WeightedFeatureCategory] {
        &self.features
    }

    pub fn mediatypes(&self) -> &BTreeMap<MediaType, bool> {
        &self.mediatypes
    }

    pub fn container_count(&self) -> usize {
        self.container_count
    }

    pub fn rerank_pending(&self) -> u32 {
        self.rerank_pending
    }

    pub fn publish_pending(&self) -> u32 {
        self.publish_pending
    }

    /// Project the session into a snapshot of raw inputs
    pub fn serialize(&self) -> ResultsSnapshot {
        let descriptors = |slots: &[usize]| {
            slots
                .iter()
                .map(|&slot| self.segments.at(slot).to_descriptor())
                .collect::<Vec<_>>()
        };

        let mut object_metadata = Vec::new();
        for object in self.objects.iter() {
            for (name, value) in &object.metadata {
                let (domain, key) = split_metadata_name(name);
                object_metadata.push(simq_common::messages::MediaObjectMetadata {
                    object_id: object.object_id.clone(),
                    domain: domain.to_string(),
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }

        let mut segment_metadata = Vec::new();
        let mut similarity = Vec::new();
        let mut detached = Vec::new();
        for (slot, segment) in self.segments.iter().enumerate() {
            if segment.kind == SegmentType::SomCluster && !self.cluster_members.contains(&slot) {
                detached.push(segment.to_descriptor());
            }
            for (name, value) in &segment.metadata {
                let (domain, key) = split_metadata_name(name);
                segment_metadata.push(simq_common::messages::MediaSegmentMetadata {
                    segment_id: segment.segment_id.clone(),
                    domain: domain.to_string(),
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
            for (container_id, values) in segment.containers() {
                for feature in &self.features {
                    if let Some(&value) = values.get(&feature.name) {
                        similarity.push(SimilarityRecord {
                            category: feature.name.clone(),
                            key: segment.segment_id.clone(),
                            value,
                            container_id,
                        });
                    }
                }
            }
        }

        ResultsSnapshot {
            query_id: self.query_id.clone(),
            objects: self.objects.iter().map(MediaObjectScoreContainer::to_descriptor).collect(),
            segments: descriptors(&self.default_view),
            cluster: descriptors(&self.cluster_view),
            overview: descriptors(&self.overview_view),
            detached,
            object_metadata,
            segment_metadata,
            similarity,
            features: self.features.clone(),
            container_count: self.container_count,
        }
    }

    /// Register cluster segments that belong to no view
    fn restore_detached(&mut self, descriptors: &[MediaSegment]) {
        for descriptor in descriptors {
            let object_slot = self.object_slot(&descriptor.object_id);
            let (slot, created) = self
                .segments
                .get_or_insert_with(&descriptor.segment_id, |_| {
                    SegmentScoreContainer::new(descriptor, object_slot, SegmentType::SomCluster)
                });
            if !created {
                continue;
            }
            self.objects.at_mut(object_slot).attach_segment(slot);
            self.rerank_pending += 1;
        }
    }

    /// Rebuild a container by replaying a snapshot through the ingestion
    /// entry points; the caller re-ranks
    pub fn deserialize(snapshot: &ResultsSnapshot, fusion: Arc<dyn FusionFunction>) -> Self {
        let query_id = snapshot.query_id.clone();
        let mut container = Self::new(query_id.clone(), fusion, snapshot.container_count);
        container.features = snapshot.features.clone();

        container.process_object_message(&ObjectQueryResult {
            query_id: query_id.clone(),
            content: snapshot.objects.clone(),
        });
        for (segment_type, content) in [
            (SegmentType::Default, &snapshot.segments),
            (SegmentType::SomCluster, &snapshot.cluster),
            (SegmentType::SomOverview, &snapshot.overview),
        ] {
            container.process_segment_message(&SegmentQueryResult {
                query_id: query_id.clone(),
                segment_type,
                content: content.clone(),
            });
        }
        container.restore_detached(&snapshot.detached);
        container.process_object_metadata_message(&ObjectMetadataQueryResult {
            query_id: query_id.clone(),
            content: snapshot.object_metadata.clone(),
        });
        container.process_segment_metadata_message(&SegmentMetadataQueryResult {
            query_id: query_id.clone(),
            content: snapshot.segment_metadata.clone(),
        });

        // One fragment per (category, container), in first-seen order
        let mut groups: Vec<SimilarityQueryResult> = Vec::new();
        let mut index: HashMap<(&str, u32), usize> = HashMap::new();
        for record in &snapshot.similarity {
            let group = *index
                .entry((record.category.as_str(), record.container_id))
                .or_insert_with(|| {
                    groups.push(SimilarityQueryResult {
                        query_id: query_id.clone(),
                        category: record.category.clone(),
                        container_id: record.container_id,
                        content: Vec::new(),
                    });
                    groups.len() - 1
                });
            groups[group].content.push(Similarity {
                key: record.key.clone(),
                value: record.value,
            });
        }
        for group in &groups {
            container.process_similarity_message(group);
        }

        debug!(
            query_id = %container.query_id,
            objects = container.object_count(),
            segments = container.segment_count(),
            similarities = snapshot.similarity.len(),
            "Restored results from snapshot"
        );
        container
    }
}
