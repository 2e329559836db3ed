//! Outbound query building blocks

use serde::{Deserialize, Serialize};

/// Per-request configuration block
///
/// `query_id` binds follow-up lookups to a running session; `hints` are passed
/// through from configuration untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl QueryConfig {
    /// Config bound to an existing session
    pub fn for_session(query_id: impl Into<String>) -> Self {
        Self {
            query_id: Some(query_id.into()),
            hints: Vec::new(),
        }
    }

    /// Config carrying hints only
    pub fn with_hints(hints: Vec<String>) -> Self {
        Self {
            query_id: None,
            hints,
        }
    }
}

/// A single query term
///
/// `data` is an opaque payload (sketch, mesh, text, ...) whose encoding is owned by
/// the producing widget; it is forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTerm {
    #[serde(rename = "type")]
    pub term_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// One stage of a staged query: all terms of a stage are evaluated together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStage {
    pub terms: Vec<QueryTerm>,
}

/// The ordered stages belonging to one query container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedSimilarityQuery {
    pub stages: Vec<QueryStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<QueryConfig>,
}

impl StagedSimilarityQuery {
    pub fn new(stages: Vec<QueryStage>) -> Self {
        Self { stages, config: None }
    }
}
