//! Test-only helpers for building story nodes and scripting generator output.

use std::cell::RefCell;
use std::collections::VecDeque;

use serde_json::json;

use crate::error::TransportError;
use crate::io::generator::Generator;
use crate::io::prompt::Prompt;
use crate::story::{NodeSpec, OptionSpec};

/// An ending node with no options.
pub fn ending(content: &str, winning: bool) -> NodeSpec {
    NodeSpec {
        content: content.to_string(),
        is_ending: true,
        is_winning_ending: winning,
        options: Vec::new(),
    }
}

/// A branching node whose options embed the given children, in order.
pub fn branch(content: &str, options: Vec<(&str, NodeSpec)>) -> NodeSpec {
    NodeSpec {
        content: content.to_string(),
        is_ending: false,
        is_winning_ending: false,
        options: options
            .into_iter()
            .map(|(text, child)| OptionSpec {
                text: text.to_string(),
                next_node: child.into(),
            })
            .collect(),
    }
}

/// Root with two ending children; the second one wins.
pub fn two_level_story() -> NodeSpec {
    branch(
        "You stand at a fork.",
        vec![
            ("Go left", ending("A troll eats you.", false)),
            ("Go right", ending("You find the treasure.", true)),
        ],
    )
}

/// Serialized `{title, rootNode}` document as a model would return it.
pub fn document_json(title: &str, root: &NodeSpec) -> String {
    json!({ "title": title, "rootNode": root }).to_string()
}

/// Serialized single node as returned by a node repair.
pub fn node_json(node: &NodeSpec) -> String {
    serde_json::to_string(node).expect("node serializes")
}

/// Generator returning scripted responses in order and recording every prompt.
///
/// Once the script runs out, `fallback` is returned if set; otherwise calls fail
/// with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<Result<String, TransportError>>>,
    fallback: Option<String>,
    requests: RefCell<Vec<Prompt>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, TransportError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            ..Self::default()
        }
    }

    /// Returns `raw` for every call.
    pub fn repeating(raw: &str) -> Self {
        Self {
            fallback: Some(raw.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<Prompt> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &Prompt) -> Result<String, TransportError> {
        self.requests.borrow_mut().push(prompt.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(response) => response,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| TransportError::new("scripted generator has no response left")),
        }
    }
}
