//! Media descriptors carried inside result fragments

use serde::{Deserialize, Serialize};
use std::fmt;

/// Media type of a retrievable object
///
/// Unknown wire values decode to `Unknown` instead of failing the whole fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Video,
    Image,
    Audio,
    Model3d,
    ImageSequence,
    #[serde(other)]
    Unknown,
}

impl MediaType {
    /// Wire name, also used to build configuration keys such as `mlt.VIDEO`
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "VIDEO",
            MediaType::Image => "IMAGE",
            MediaType::Audio => "AUDIO",
            MediaType::Model3d => "MODEL3D",
            MediaType::ImageSequence => "IMAGE_SEQUENCE",
            MediaType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object descriptor (one entry of a `QR_OBJECT` fragment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediatype: Option<MediaType>,
    #[serde(default, rename = "contentURL", skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
}

impl MediaObject {
    pub fn new(object_id: impl Into<String>, mediatype: MediaType) -> Self {
        Self {
            object_id: object_id.into(),
            name: None,
            path: None,
            mediatype: Some(mediatype),
            content_url: None,
        }
    }
}

/// Segment descriptor (one entry of a `QR_SEGMENT` fragment)
///
/// Temporal fields are in frames (`start`/`end`) and seconds (`startabs`/`endabs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSegment {
    pub segment_id: String,
    pub object_id: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    #[serde(default)]
    pub startabs: f64,
    #[serde(default)]
    pub endabs: f64,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub sequence_number: u32,
}

impl MediaSegment {
    pub fn new(segment_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            segment_id: segment_id.into(),
            object_id: object_id.into(),
            start: 0,
            end: 0,
            startabs: 0.0,
            endabs: 0.0,
            count: 0,
            sequence_number: 0,
        }
    }
}

/// Result kind of a segment fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    #[default]
    Default,
    SomOverview,
    SomCluster,
}

/// One similarity observation: segment id (`key`) and its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    pub key: String,
    pub value: f64,
}

/// Metadata record attached to an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObjectMetadata {
    pub object_id: String,
    pub domain: String,
    pub key: String,
    pub value: String,
}

/// Metadata record attached to a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSegmentMetadata {
    pub segment_id: String,
    pub domain: String,
    pub key: String,
    pub value: String,
}
