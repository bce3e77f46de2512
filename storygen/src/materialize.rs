//! Tree materialization: turn an accepted story tree into stored rows.
//!
//! Every node is written before its children, and a node's option list is
//! written only once all of its children have ids, so each stored option points
//! at an existing row. Malformed embedded nodes get exactly one isolated repair.

use tracing::{debug, info, instrument, warn};

use crate::core::invariants::child_path;
use crate::core::validator::{ROOT_PATH, check_tree_shape, validate_node};
use crate::error::{AttemptError, GenerationError};
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::store::{NewNode, StoryWriter};
use crate::story::{EmbeddedNode, MalformedNode, NodeSpec, OptionEdge, StoryNodeRecord};

/// Path label for a subtree materialized on its own (`is_root == false`).
pub const SUBTREE_PATH: &str = "subtree";

pub struct Materializer<'a, G: Generator, W: StoryWriter> {
    generator: &'a G,
    prompts: &'a PromptBuilder,
    writer: &'a W,
}

impl<'a, G: Generator, W: StoryWriter> Materializer<'a, G, W> {
    pub fn new(generator: &'a G, prompts: &'a PromptBuilder, writer: &'a W) -> Self {
        Self {
            generator,
            prompts,
            writer,
        }
    }

    /// Persist `node` and its subtree under `story_id`, returning the stored node.
    #[instrument(skip(self, node))]
    pub fn materialize(
        &self,
        story_id: i64,
        node: &NodeSpec,
        is_root: bool,
    ) -> Result<StoryNodeRecord, GenerationError> {
        let path = if is_root { ROOT_PATH } else { SUBTREE_PATH };
        check_tree_shape(node, path).map_err(GenerationError::Validation)?;
        let record = self.persist(story_id, node, is_root, path)?;
        info!(node_id = record.id, "story tree materialized");
        Ok(record)
    }

    fn persist(
        &self,
        story_id: i64,
        node: &NodeSpec,
        is_root: bool,
        path: &str,
    ) -> Result<StoryNodeRecord, GenerationError> {
        let node_id = self.writer.create_node(
            story_id,
            &NewNode {
                content: &node.content,
                is_root,
                is_ending: node.is_ending,
                is_winning_ending: node.is_winning_ending,
            },
        )?;
        debug!(node_id, %path, "node stored");

        let mut record = StoryNodeRecord {
            id: node_id,
            story_id,
            content: node.content.clone(),
            is_root,
            is_ending: node.is_ending,
            is_winning_ending: node.is_winning_ending,
            options: Vec::new(),
        };
        if node.is_ending {
            return Ok(record);
        }

        let mut edges = Vec::with_capacity(node.options.len());
        for (index, option) in node.options.iter().enumerate() {
            let next_path = child_path(path, index);
            let child = match &option.next_node {
                EmbeddedNode::Valid(child) => self.persist(story_id, child, false, &next_path)?,
                EmbeddedNode::Malformed(malformed) => {
                    let repaired = self.repair(malformed)?;
                    self.persist(story_id, &repaired, false, &malformed.path)?
                }
            };
            edges.push(OptionEdge {
                text: option.text.clone(),
                node_id: child.id,
            });
        }
        self.writer.set_node_options(node_id, &edges)?;
        record.options = edges;
        Ok(record)
    }

    /// One isolated repair of a malformed node; any failure is fatal.
    fn repair(&self, malformed: &MalformedNode) -> Result<NodeSpec, GenerationError> {
        info!(path = %malformed.path, error = %malformed.error, "repairing invalid node");
        let prompt =
            self.prompts
                .build_node_repair(&malformed.raw_text(), &malformed.path, &malformed.error);
        let node_repair_failed = |source: AttemptError| {
            warn!(path = %malformed.path, error = %source, "node repair failed");
            GenerationError::NodeRepair {
                path: malformed.path.clone(),
                source,
            }
        };

        let raw = self
            .generator
            .generate(&prompt)
            .map_err(|err| node_repair_failed(err.into()))?;
        validate_node(&raw, &malformed.path).map_err(|err| node_repair_failed(err.into()))
    }
}
