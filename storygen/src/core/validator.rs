//! Schema validation of raw model output.
//!
//! Raw text decodes once into typed values. Every embedded node (the root and
//! each `nextNode`) becomes an [`EmbeddedNode`]: well-formed nodes are decoded
//! recursively, malformed ones keep their raw JSON and node-level error so they
//! can be repaired in isolation later.

use std::sync::LazyLock;

use jsonschema::Validator;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::invariants::{
    child_path, has_winning_path, validate_node_rules, validate_tree_shape,
};
use crate::error::ValidationError;
use crate::story::{EmbeddedNode, MalformedNode, NodeSpec, OptionSpec, StoryDocument};

pub const DOCUMENT_SCHEMA: &str = include_str!("../../schemas/story_document.schema.json");
pub const NODE_SCHEMA: &str = include_str!("../../schemas/story_node.schema.json");

/// JSON path used for the document root in error messages.
pub const ROOT_PATH: &str = "rootNode";

static DOCUMENT_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile_schema(DOCUMENT_SCHEMA));
static NODE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(NODE_SCHEMA));

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

fn compile_schema(schema: &str) -> Validator {
    let value: Value = serde_json::from_str(schema).expect("embedded schema should be valid JSON");
    jsonschema::validator_for(&value).expect("embedded schema should compile")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    title: String,
    root_node: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    content: String,
    is_ending: bool,
    is_winning_ending: bool,
    options: Vec<RawOption>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOption {
    text: String,
    next_node: Value,
}

/// Decode a full story document from raw model output.
///
/// Fails with [`ValidationError::Decode`] when the text is not JSON and with
/// [`ValidationError::Schema`] when the envelope is wrong or a well-formed root
/// has no path to a winning ending. A malformed root is not an error here; the
/// repair loop checks it separately.
pub fn validate(raw_text: &str) -> Result<StoryDocument, ValidationError> {
    let value = parse_json(raw_text)?;

    let errors = schema_errors(&DOCUMENT_VALIDATOR, &value, "document");
    if !errors.is_empty() {
        return Err(ValidationError::schema(errors));
    }
    let envelope: RawDocument = serde_json::from_value(value)
        .map_err(|err| ValidationError::schema(vec![format!("document: {err}")]))?;

    let document = StoryDocument {
        title: envelope.title,
        root_node: decode_embedded(&envelope.root_node, ROOT_PATH),
    };
    if let Some(root) = document.root() {
        check_document(root)?;
    }
    Ok(document)
}

/// Decode a single node from raw text (used for isolated node repair).
pub fn validate_node(raw_text: &str, path: &str) -> Result<NodeSpec, ValidationError> {
    let value = parse_json(raw_text)?;
    decode_node(&value, path)
}

/// Decode one node from parsed JSON.
///
/// Only this node's own fields and option count are checked; children that fail
/// are kept as [`EmbeddedNode::Malformed`].
pub fn decode_node(value: &Value, path: &str) -> Result<NodeSpec, ValidationError> {
    let mut errors = schema_errors(&NODE_VALIDATOR, value, path);
    if !errors.is_empty() {
        return Err(ValidationError::schema(errors));
    }

    let raw: RawNode = serde_json::from_value(value.clone())
        .map_err(|err| ValidationError::schema(vec![format!("{path}: {err}")]))?;
    errors.extend(validate_node_rules(
        raw.is_ending,
        raw.is_winning_ending,
        raw.options.len(),
        path,
    ));
    if !errors.is_empty() {
        return Err(ValidationError::schema(errors));
    }

    let options = raw
        .options
        .into_iter()
        .enumerate()
        .map(|(index, option)| OptionSpec {
            text: option.text,
            next_node: decode_embedded(&option.next_node, &child_path(path, index)),
        })
        .collect();

    Ok(NodeSpec {
        content: raw.content,
        is_ending: raw.is_ending,
        is_winning_ending: raw.is_winning_ending,
        options,
    })
}

/// Document-wide checks on a well-formed root.
pub fn check_document(root: &NodeSpec) -> Result<(), ValidationError> {
    if !has_winning_path(root) {
        return Err(ValidationError::schema(vec![format!(
            "{ROOT_PATH}: story has no path to an ending with isWinningEnding=true"
        )]));
    }
    Ok(())
}

/// Re-check option counts and winning flags over every well-formed node of the
/// tree rooted at `path`.
pub fn check_tree_shape(node: &NodeSpec, path: &str) -> Result<(), ValidationError> {
    let errors = validate_tree_shape(node, path);
    if errors.is_empty() {
        return Ok(());
    }
    Err(ValidationError::schema(errors))
}

fn decode_embedded(value: &Value, path: &str) -> EmbeddedNode {
    match decode_node(value, path) {
        Ok(node) => node.into(),
        Err(error) => EmbeddedNode::Malformed(MalformedNode {
            path: path.to_string(),
            raw: value.clone(),
            error,
        }),
    }
}

fn parse_json(raw_text: &str) -> Result<Value, ValidationError> {
    let payload = extract_payload(raw_text);
    if payload.is_empty() {
        return Err(ValidationError::decode("output is empty"));
    }
    serde_json::from_str(payload).map_err(|err| ValidationError::decode(err.to_string()))
}

/// Strip a Markdown code fence or surrounding prose from the JSON payload.
fn extract_payload(raw_text: &str) -> &str {
    if let Some(inner) = FENCE_RE.captures(raw_text).and_then(|caps| caps.get(1)) {
        return inner.as_str().trim();
    }
    let trimmed = raw_text.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn schema_errors(validator: &Validator, value: &Value, path: &str) -> Vec<String> {
    validator
        .iter_errors(value)
        .map(|err| format!("{path}: {err}"))
        .collect()
}
