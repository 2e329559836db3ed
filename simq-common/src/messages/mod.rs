//! Protocol messages exchanged over the query channel
//!
//! Both directions are closed enums tagged by `messageType` on the wire, so every
//! consumer matches exhaustively. Wire tags follow the retrieval engine's websocket
//! API (`QR_*` for results, `Q_*` for requests).

mod media;
mod queries;

pub use media::{
    MediaObject, MediaObjectMetadata, MediaSegment, MediaSegmentMetadata, MediaType,
    SegmentType, Similarity,
};
pub use queries::{QueryConfig, QueryStage, QueryTerm, StagedSimilarityQuery};

use crate::Result;
use serde::{Deserialize, Serialize};

/// Session start acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStart {
    pub query_id: String,
}

/// Session end marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEnd {
    pub query_id: String,
}

/// Error reported by the far end for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    pub query_id: String,
    #[serde(default)]
    pub message: String,
}

/// Batch of object descriptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectQueryResult {
    pub query_id: String,
    #[serde(default)]
    pub content: Vec<MediaObject>,
}

/// Batch of segment descriptors tagged with their result kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentQueryResult {
    pub query_id: String,
    #[serde(rename = "type", default)]
    pub segment_type: SegmentType,
    #[serde(default)]
    pub content: Vec<MediaSegment>,
}

/// Similarity values of one feature category produced for one query container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityQueryResult {
    pub query_id: String,
    pub category: String,
    #[serde(default)]
    pub container_id: u32,
    #[serde(default)]
    pub content: Vec<Similarity>,
}

/// Batch of object metadata records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadataQueryResult {
    pub query_id: String,
    #[serde(default)]
    pub content: Vec<MediaObjectMetadata>,
}

/// Batch of segment metadata records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetadataQueryResult {
    pub query_id: String,
    #[serde(default)]
    pub content: Vec<MediaSegmentMetadata>,
}

/// Available ranking backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieverQueryResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default)]
    pub content: Vec<String>,
}

/// Inbound message (far end → client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ApiMessage {
    #[serde(rename = "QR_START")]
    QueryStart(QueryStart),
    #[serde(rename = "QR_END")]
    QueryEnd(QueryEnd),
    #[serde(rename = "QR_ERROR")]
    QueryError(QueryError),
    #[serde(rename = "QR_OBJECT")]
    Object(ObjectQueryResult),
    #[serde(rename = "QR_SEGMENT")]
    Segment(SegmentQueryResult),
    #[serde(rename = "QR_SIMILARITY")]
    Similarity(SimilarityQueryResult),
    #[serde(rename = "QR_METADATA_O")]
    ObjectMetadata(ObjectMetadataQueryResult),
    #[serde(rename = "QR_METADATA_S")]
    SegmentMetadata(SegmentMetadataQueryResult),
    #[serde(rename = "QR_RETRIEVER")]
    Retrievers(RetrieverQueryResult),
}

impl ApiMessage {
    /// Decode one message from its JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Session id the message is correlated with, if it carries one
    pub fn query_id(&self) -> Option<&str> {
        match self {
            ApiMessage::QueryStart(m) => Some(&m.query_id),
            ApiMessage::QueryEnd(m) => Some(&m.query_id),
            ApiMessage::QueryError(m) => Some(&m.query_id),
            ApiMessage::Object(m) => Some(&m.query_id),
            ApiMessage::Segment(m) => Some(&m.query_id),
            ApiMessage::Similarity(m) => Some(&m.query_id),
            ApiMessage::ObjectMetadata(m) => Some(&m.query_id),
            ApiMessage::SegmentMetadata(m) => Some(&m.query_id),
            ApiMessage::Retrievers(m) => m.query_id.as_deref(),
        }
    }

    /// Wire tag, for logging
    pub fn message_type(&self) -> &'static str {
        match self {
            ApiMessage::QueryStart(_) => "QR_START",
            ApiMessage::QueryEnd(_) => "QR_END",
            ApiMessage::QueryError(_) => "QR_ERROR",
            ApiMessage::Object(_) => "QR_OBJECT",
            ApiMessage::Segment(_) => "QR_SEGMENT",
            ApiMessage::Similarity(_) => "QR_SIMILARITY",
            ApiMessage::ObjectMetadata(_) => "QR_METADATA_O",
            ApiMessage::SegmentMetadata(_) => "QR_METADATA_S",
            ApiMessage::Retrievers(_) => "QR_RETRIEVER",
        }
    }
}

/// Outbound request (client → far end)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum QueryRequest {
    /// Staged similarity query over one or more query containers
    #[serde(rename = "Q_TEMPORAL")]
    Temporal {
        queries: Vec<StagedSimilarityQuery>,
        config: QueryConfig,
    },

    /// More-Like-This query using an existing segment as example
    #[serde(rename = "Q_MLT", rename_all = "camelCase")]
    MoreLikeThis {
        segment_id: String,
        categories: Vec<String>,
        config: QueryConfig,
    },

    /// Temporal neighbours of a segment (`count` on each side)
    #[serde(rename = "Q_NESEG", rename_all = "camelCase")]
    NeighboringSegments {
        segment_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
        config: QueryConfig,
    },

    /// Lookup of a single segment
    #[serde(rename = "Q_SEG", rename_all = "camelCase")]
    Segment { segment_id: String, config: QueryConfig },

    #[serde(rename = "Q_SOM_TRAIN")]
    SomTrain { retriever: String, size: u32 },

    #[serde(rename = "Q_SOM_UPDATE")]
    SomUpdate {
        size: u32,
        retriever: String,
        deepness: u32,
        positives: Vec<String>,
        negatives: Vec<String>,
        config: QueryConfig,
    },

    #[serde(rename = "Q_SOM_CLUSTER")]
    SomCluster { cids: Vec<String>, config: QueryConfig },

    /// Ask for the list of available retrievers
    #[serde(rename = "Q_RETRIEVER")]
    Retrievers,
}

impl QueryRequest {
    /// Encode as JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire tag, for logging
    pub fn message_type(&self) -> &'static str {
        match self {
            QueryRequest::Temporal { .. } => "Q_TEMPORAL",
            QueryRequest::MoreLikeThis { .. } => "Q_MLT",
            QueryRequest::NeighboringSegments { .. } => "Q_NESEG",
            QueryRequest::Segment { .. } => "Q_SEG",
            QueryRequest::SomTrain { .. } => "Q_SOM_TRAIN",
            QueryRequest::SomUpdate { .. } => "Q_SOM_UPDATE",
            QueryRequest::SomCluster { .. } => "Q_SOM_CLUSTER",
            QueryRequest::Retrievers => "Q_RETRIEVER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_segment_fragment() {
        let json = r#"{
            "messageType": "QR_SEGMENT",
            "queryId": "Q1",
            "type": "SOM_CLUSTER",
            "content": [{"segmentId": "s1", "objectId": "o1", "sequenceNumber": 3}]
        }"#;

        let message = ApiMessage::from_json(json).expect("segment fragment should decode");
        match &message {
            ApiMessage::Segment(seg) => {
                assert_eq!(seg.segment_type, SegmentType::SomCluster);
                assert_eq!(seg.content[0].sequence_number, 3);
            }
            other => panic!("Wrong message decoded: {:?}", other),
        }
        assert_eq!(message.query_id(), Some("Q1"));
        assert_eq!(message.message_type(), "QR_SEGMENT");
    }

    #[test]
    fn test_segment_fragment_defaults_to_default_kind() {
        let json = r#"{"messageType":"QR_SEGMENT","queryId":"Q1","content":[]}"#;
        match ApiMessage::from_json(json).unwrap() {
            ApiMessage::Segment(seg) => assert_eq!(seg.segment_type, SegmentType::Default),
            other => panic!("Wrong message decoded: {:?}", other),
        }
    }

    #[test]
    fn test_decode_similarity_fragment() {
        let json = r#"{
            "messageType": "QR_SIMILARITY",
            "queryId": "Q1",
            "category": "globalcolor",
            "containerId": 1,
            "content": [{"key": "s1", "value": 0.25}]
        }"#;

        match ApiMessage::from_json(json).unwrap() {
            ApiMessage::Similarity(sim) => {
                assert_eq!(sim.category, "globalcolor");
                assert_eq!(sim.container_id, 1);
                assert_eq!(sim.content, vec![Similarity { key: "s1".into(), value: 0.25 }]);
            }
            other => panic!("Wrong message decoded: {:?}", other),
        }
    }

    #[test]
    fn test_retriever_list_has_no_session() {
        let json = r#"{"messageType":"QR_RETRIEVER","content":["b","a"]}"#;
        let message = ApiMessage::from_json(json).unwrap();
        assert_eq!(message.query_id(), None);
    }

    #[test]
    fn test_start_and_end_are_distinct_markers() {
        let start = ApiMessage::from_json(r#"{"messageType":"QR_START","queryId":"Q1"}"#).unwrap();
        let end = ApiMessage::from_json(r#"{"messageType":"QR_END","queryId":"Q1"}"#).unwrap();
        assert!(matches!(start, ApiMessage::QueryStart(ref m) if m.query_id == "Q1"));
        assert!(matches!(end, ApiMessage::QueryEnd(ref m) if m.query_id == "Q1"));
        assert_eq!(end.message_type(), "QR_END");
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let json = r#"{"messageType":"PING","queryId":"Q1"}"#;
        assert!(ApiMessage::from_json(json).is_err());
    }

    #[test]
    fn test_encode_more_like_this() {
        let request = QueryRequest::MoreLikeThis {
            segment_id: "s1".into(),
            categories: vec!["globalcolor".into()],
            config: QueryConfig::with_hints(vec!["exact".into()]),
        };

        let json = request.to_json().unwrap();
        assert!(json.contains("\"messageType\":\"Q_MLT\""));
        assert!(json.contains("\"segmentId\":\"s1\""));
        assert!(json.contains("\"hints\":[\"exact\"]"));
        assert!(!json.contains("queryId"), "unbound config should omit queryId");
    }

    #[test]
    fn test_encode_neighbor_lookup_carries_session() {
        let request = QueryRequest::NeighboringSegments {
            segment_id: "s7".into(),
            count: Some(4),
            config: QueryConfig::for_session("Q1"),
        };

        let json = request.to_json().unwrap();
        assert!(json.contains("\"messageType\":\"Q_NESEG\""));
        assert!(json.contains("\"queryId\":\"Q1\""));
        assert!(json.contains("\"count\":4"));
        assert_eq!(request.message_type(), "Q_NESEG");
    }

    #[test]
    fn test_encode_retriever_request() {
        let json = QueryRequest::Retrievers.to_json().unwrap();
        assert_eq!(json, r#"{"messageType":"Q_RETRIEVER"}"#);
    }
}
