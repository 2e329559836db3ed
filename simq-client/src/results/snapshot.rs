//! Serializable projection of a results session
//!
//! A snapshot keeps the raw inputs (descriptors, metadata records and similarity
//! observations), never computed scores. Restoring replays the inputs through the
//! regular ingestion entry points.

use crate::scores::WeightedFeatureCategory;
use serde::{Deserialize, Serialize};
use simq_common::messages::{MediaObject, MediaObjectMetadata, MediaSegment, MediaSegmentMetadata};

/// One raw similarity observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityRecord {
    pub category: String,
    /// Segment id
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub container_id: u32,
}

/// Session state as stored in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSnapshot {
    pub query_id: String,
    #[serde(default)]
    pub objects: Vec<MediaObject>,
    /// Default-view segments
    #[serde(default)]
    pub segments: Vec<MediaSegment>,
    #[serde(default)]
    pub cluster: Vec<MediaSegment>,
    #[serde(default)]
    pub overview: Vec<MediaSegment>,
    /// Cluster segments cleared from the cluster view; they still count towards
    /// their object's score
    #[serde(default)]
    pub detached: Vec<MediaSegment>,
    #[serde(default)]
    pub object_metadata: Vec<MediaObjectMetadata>,
    #[serde(default)]
    pub segment_metadata: Vec<MediaSegmentMetadata>,
    #[serde(default)]
    pub similarity: Vec<SimilarityRecord>,
    #[serde(default)]
    pub features: Vec<WeightedFeatureCategory>,
    /// Number of query containers (stages) of the issued query
    #[serde(default)]
    pub container_count: usize,
}

impl ResultsSnapshot {
    pub fn from_json(text: &str) -> simq_common::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> simq_common::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> simq_common::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Split a flattened `"domain.key"` metadata name
pub(crate) fn split_metadata_name(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("", name))
}

pub(crate) fn metadata_name(domain: &str, key: &str) -> String {
    format!("{}.{}", domain, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_name_splits_at_first_dot() {
        assert_eq!(split_metadata_name("technical.duration"), ("technical", "duration"));
        assert_eq!(split_metadata_name("exif.gps.lat"), ("exif", "gps.lat"));
        assert_eq!(split_metadata_name("plain"), ("", "plain"));
        assert_eq!(metadata_name("exif", "gps.lat"), "exif.gps.lat");
    }

    #[test]
    fn test_missing_collections_default_to_empty() {
        let snapshot = ResultsSnapshot::from_json(r#"{"queryId":"q1"}"#).unwrap();
        assert_eq!(snapshot.query_id, "q1");
        assert!(snapshot.segments.is_empty());
        assert!(snapshot.similarity.is_empty());
        assert_eq!(snapshot.container_count, 0);
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let snapshot = ResultsSnapshot {
            query_id: "q1".into(),
            objects: vec![],
            segments: vec![],
            cluster: vec![],
            overview: vec![],
            detached: vec![],
            object_metadata: vec![],
            segment_metadata: vec![],
            similarity: vec![SimilarityRecord {
                category: "color".into(),
                key: "s1".into(),
                value: 0.5,
                container_id: 1,
            }],
            features: vec![],
            container_count: 2,
        };
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"queryId\":\"q1\""));
        assert!(json.contains("\"containerId\":1"));
        assert!(json.contains("\"containerCount\":2"));
    }
}
