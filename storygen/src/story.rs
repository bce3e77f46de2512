//! Story data model: the transient generated document and the persisted records.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::ValidationError;

/// Full generated story payload before persistence.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDocument {
    pub title: String,
    pub root_node: EmbeddedNode,
}

impl StoryDocument {
    /// The root node, if it decoded cleanly.
    pub fn root(&self) -> Option<&NodeSpec> {
        self.root_node.as_valid()
    }
}

/// One narrative beat as produced by the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub content: String,
    pub is_ending: bool,
    pub is_winning_ending: bool,
    pub options: Vec<OptionSpec>,
}

/// A labeled choice embedding its complete child node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSpec {
    pub text: String,
    pub next_node: EmbeddedNode,
}

/// An embedded node decoded exactly once: either a well-formed node or the raw
/// JSON together with the node-level error that rejected it.
#[derive(Clone, Debug, PartialEq)]
pub enum EmbeddedNode {
    Valid(Box<NodeSpec>),
    Malformed(MalformedNode),
}

impl EmbeddedNode {
    pub fn as_valid(&self) -> Option<&NodeSpec> {
        match self {
            Self::Valid(node) => Some(node),
            Self::Malformed(_) => None,
        }
    }
}

impl From<NodeSpec> for EmbeddedNode {
    fn from(node: NodeSpec) -> Self {
        Self::Valid(Box::new(node))
    }
}

impl Serialize for EmbeddedNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Valid(node) => node.serialize(serializer),
            Self::Malformed(malformed) => malformed.raw.serialize(serializer),
        }
    }
}

/// Raw JSON of a node that failed node-level validation.
#[derive(Clone, Debug, PartialEq)]
pub struct MalformedNode {
    /// JSON path of the node inside the document (e.g. `rootNode.options[0].nextNode`).
    pub path: String,
    pub raw: Value,
    pub error: ValidationError,
}

impl MalformedNode {
    /// Pretty-printed raw JSON, quoted back to the model in repair prompts.
    pub fn raw_text(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }
}

/// Persisted story row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoryRecord {
    pub id: i64,
    pub title: String,
    pub session_id: String,
    /// RFC 3339 UTC timestamp.
    pub created_at: String,
}

/// Persisted node row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoryNodeRecord {
    pub id: i64,
    pub story_id: i64,
    pub content: String,
    pub is_root: bool,
    pub is_ending: bool,
    pub is_winning_ending: bool,
    pub options: Vec<OptionEdge>,
}

/// Stored option edge pointing at a child node of the same story.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct OptionEdge {
    pub text: String,
    pub node_id: i64,
}
