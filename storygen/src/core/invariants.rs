//! Story shape invariants not expressed in the JSON Schemas.

use serde_json::Value;

use crate::story::{EmbeddedNode, NodeSpec};

/// Smallest option count for a branching node.
pub const MIN_OPTIONS: usize = 2;
/// Largest option count for a branching node.
pub const MAX_OPTIONS: usize = 3;
/// `content` length limit; mirrors `maxLength` in the node schema.
pub const CONTENT_MAX_CHARS: usize = 200;
/// `option.text` length limit; mirrors `maxLength` in the node schema.
pub const OPTION_TEXT_MAX_CHARS: usize = 50;

/// Check the rules that apply to a single node:
/// - endings have no options
/// - branching nodes have `MIN_OPTIONS..=MAX_OPTIONS` options
/// - `isWinningEnding` is only set on endings
pub fn validate_node_rules(
    is_ending: bool,
    is_winning_ending: bool,
    option_count: usize,
    path: &str,
) -> Vec<String> {
    let mut errors = Vec::new();

    if is_ending && option_count != 0 {
        errors.push(format!(
            "{path}: ending node must have no options (found {option_count})"
        ));
    }
    if !is_ending && !(MIN_OPTIONS..=MAX_OPTIONS).contains(&option_count) {
        errors.push(format!(
            "{path}: non-ending node must have {MIN_OPTIONS}-{MAX_OPTIONS} options (found {option_count})"
        ));
    }
    if is_winning_ending && !is_ending {
        errors.push(format!(
            "{path}: isWinningEnding is only allowed when isEnding is true"
        ));
    }

    errors
}

/// Re-check node rules over every well-formed node of a tree.
///
/// Malformed embedded nodes are skipped; they are repaired in isolation during
/// materialization.
pub fn validate_tree_shape(root: &NodeSpec, path: &str) -> Vec<String> {
    let mut errors = Vec::new();
    collect_shape_errors(root, path, &mut errors);
    errors
}

fn collect_shape_errors(node: &NodeSpec, path: &str, errors: &mut Vec<String>) {
    errors.extend(validate_node_rules(
        node.is_ending,
        node.is_winning_ending,
        node.options.len(),
        path,
    ));
    for (index, option) in node.options.iter().enumerate() {
        if let EmbeddedNode::Valid(child) = &option.next_node {
            let child_path = child_path(path, index);
            collect_shape_errors(child, &child_path, errors);
        }
    }
}

/// True if some root-to-ending path may end on a winning ending.
///
/// A malformed subtree counts when its raw JSON declares `isWinningEnding: true`
/// anywhere; it is repaired on its own later and must not fail the document.
pub fn has_winning_path(node: &NodeSpec) -> bool {
    if node.is_ending {
        return node.is_winning_ending;
    }
    node.options.iter().any(|option| match &option.next_node {
        EmbeddedNode::Valid(child) => has_winning_path(child),
        EmbeddedNode::Malformed(malformed) => declares_winning_ending(&malformed.raw),
    })
}

fn declares_winning_ending(raw: &Value) -> bool {
    match raw {
        Value::Object(fields) => {
            fields.get("isWinningEnding") == Some(&Value::Bool(true))
                || fields.values().any(declares_winning_ending)
        }
        Value::Array(items) => items.iter().any(declares_winning_ending),
        _ => false,
    }
}

/// JSON path of the child embedded in option `index` of the node at `path`.
pub fn child_path(path: &str, index: usize) -> String {
    format!("{path}.options[{index}].nextNode")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::story::{MalformedNode, OptionSpec};
    use crate::test_support::{branch, ending};
    use serde_json::json;

    fn with_malformed_option(mut node: NodeSpec, raw: Value) -> NodeSpec {
        node.options.push(OptionSpec {
            text: "broken".to_string(),
            next_node: EmbeddedNode::Malformed(MalformedNode {
                path: child_path("rootNode", node.options.len()),
                raw,
                error: ValidationError::schema(vec!["missing isEnding".to_string()]),
            }),
        });
        node
    }

    #[test]
    fn ending_with_options_is_rejected() {
        let errors = validate_node_rules(true, false, 2, "rootNode");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ending node must have no options"));
    }

    #[test]
    fn branching_node_needs_two_to_three_options() {
        assert!(validate_node_rules(false, false, 2, "n").is_empty());
        assert!(validate_node_rules(false, false, 3, "n").is_empty());
        assert!(!validate_node_rules(false, false, 1, "n").is_empty());
        assert!(!validate_node_rules(false, false, 4, "n").is_empty());
        assert!(!validate_node_rules(false, false, 0, "n").is_empty());
    }

    #[test]
    fn winning_flag_requires_ending() {
        let errors = validate_node_rules(false, true, 2, "rootNode");
        assert!(errors.iter().any(|err| err.contains("isWinningEnding")));
    }

    #[test]
    fn tree_shape_reports_nested_paths() {
        let bad = branch("middle", vec![("only", ending("end", true))]);
        let root = branch("start", vec![("a", bad), ("b", ending("lose", false))]);

        let errors = validate_tree_shape(&root, "rootNode");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("rootNode.options[0].nextNode:"));
    }

    #[test]
    fn winning_path_found_at_depth() {
        let root = branch(
            "start",
            vec![
                ("a", ending("lose", false)),
                (
                    "b",
                    branch(
                        "deeper",
                        vec![("c", ending("lose", false)), ("d", ending("win", true))],
                    ),
                ),
            ],
        );
        assert!(has_winning_path(&root));
    }

    #[test]
    fn no_winning_path_detected() {
        let root = branch(
            "start",
            vec![("a", ending("lose", false)), ("b", ending("lose", false))],
        );
        assert!(!has_winning_path(&root));
    }

    #[test]
    fn malformed_winning_ending_counts_toward_winning_path() {
        let root = with_malformed_option(
            branch("start", vec![("a", ending("lose", false))]),
            json!({ "content": "Treasure!", "isWinningEnding": true, "options": [] }),
        );
        assert!(has_winning_path(&root));
    }

    #[test]
    fn malformed_subtree_with_nested_winner_counts() {
        let root = with_malformed_option(
            branch("start", vec![("a", ending("lose", false))]),
            json!({
                "content": "A door.",
                "options": [
                    { "text": "open", "nextNode": { "content": "Gold.", "isEnding": true, "isWinningEnding": true, "options": [] } }
                ]
            }),
        );
        assert!(has_winning_path(&root));
    }

    #[test]
    fn malformed_losing_child_does_not_count() {
        let root = with_malformed_option(
            branch("start", vec![("a", ending("lose", false))]),
            json!({ "content": "Still lost.", "isWinningEnding": false, "options": [] }),
        );
        assert!(!has_winning_path(&root));
    }
}
