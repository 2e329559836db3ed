//! Per-object score container

use simq_common::messages::{MediaObject, MediaType};
use std::collections::BTreeMap;

/// Aggregate for one retrievable object
///
/// Descriptive fields stay `None` until the object descriptor arrives; the
/// container may be created earlier by a segment descriptor that references it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaObjectScoreContainer {
    pub object_id: String,
    pub name: Option<String>,
    pub path: Option<String>,
    pub mediatype: Option<MediaType>,
    pub content_url: Option<String>,
    /// Arena slots of owned segments, in attachment order
    segments: Vec<usize>,
    pub metadata: BTreeMap<String, String>,
    pub score: f64,
    pub show: bool,
}

impl MediaObjectScoreContainer {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            name: None,
            path: None,
            mediatype: None,
            content_url: None,
            segments: Vec::new(),
            metadata: BTreeMap::new(),
            score: 0.0,
            show: true,
        }
    }

    /// Take over descriptive fields from an object descriptor
    pub fn apply(&mut self, object: &MediaObject) {
        self.mediatype = object.mediatype;
        self.name = object.name.clone();
        self.path = object.path.clone();
        self.content_url = object.content_url.clone();
    }

    /// Attach a segment slot; attaching twice is a no-op
    pub fn attach_segment(&mut self, slot: usize) -> bool {
        if self.segments.contains(&slot) {
            return false;
        }
        self.segments.push(slot);
        true
    }

    pub fn segments(&self) -> &[usize] {
        &self.segments
    }

    /// Descriptor form, as delivered by the far end
    pub fn to_descriptor(&self) -> MediaObject {
        MediaObject {
            object_id: self.object_id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            mediatype: self.mediatype,
            content_url: self.content_url.clone(),
        }
    }
}
