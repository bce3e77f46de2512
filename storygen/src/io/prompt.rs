//! Prompt builder for story generation and repair.
//!
//! Every prompt is a pure function of its inputs: the same theme, previous
//! output and error always render the same text.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::invariants::{CONTENT_MAX_CHARS, MAX_OPTIONS, MIN_OPTIONS, OPTION_TEXT_MAX_CHARS};
use crate::core::validator::{DOCUMENT_SCHEMA, NODE_SCHEMA};
use crate::error::ValidationError;

const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");
const FORMAT_TEMPLATE: &str = include_str!("prompts/format.md");
const STORY_TEMPLATE: &str = include_str!("prompts/story.md");
const DOCUMENT_REPAIR_TEMPLATE: &str = include_str!("prompts/document_repair.md");
const NODE_REPAIR_TEMPLATE: &str = include_str!("prompts/node_repair.md");

const TRUNCATION_MARKER: &str = "\n[truncated]";

const DOCUMENT_REPAIR_REQUEST: &str = "Fix the JSON and return it.";
const NODE_REPAIR_REQUEST: &str = "Fix the node JSON and return it.";

/// A system turn plus a user turn sent to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Total size in bytes of both turns.
    pub fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }
}

/// Values shared by every template.
#[derive(Debug, Clone, Serialize)]
struct Limits {
    min_options: usize,
    max_options: usize,
    content_max: usize,
    option_max: usize,
}

const LIMITS: Limits = Limits {
    min_options: MIN_OPTIONS,
    max_options: MAX_OPTIONS,
    content_max: CONTENT_MAX_CHARS,
    option_max: OPTION_TEXT_MAX_CHARS,
};

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("instructions", INSTRUCTIONS_TEMPLATE)
            .expect("instructions template should be valid");
        env.add_template("format", FORMAT_TEMPLATE)
            .expect("format template should be valid");
        env.add_template("story", STORY_TEMPLATE)
            .expect("story template should be valid");
        env.add_template("document_repair", DOCUMENT_REPAIR_TEMPLATE)
            .expect("document repair template should be valid");
        env.add_template("node_repair", NODE_REPAIR_TEMPLATE)
            .expect("node repair template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> String {
        self.env
            .get_template(name)
            .and_then(|template| template.render(ctx))
            .expect("prompt template rendering should not fail")
    }
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Split rendered template output into section bodies using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`. An empty
/// droppable section is left out; required sections are always kept.
fn parse_sections(rendered: &str) -> Vec<String> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:\w+\s+(required|droppable)\s*-->").unwrap()
    });

    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(kind)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());

        let content = rendered[whole.end()..end].trim();
        if !content.is_empty() || kind.as_str() == "required" {
            sections.push(content.to_string());
        }
    }

    sections
}

/// Render sections back to a single string.
fn render_sections(sections: &[String]) -> String {
    sections.join("\n\n")
}

/// Shorten `text` by at least `excess` bytes, marking the cut.
fn truncate_quoted(text: &str, excess: usize) -> String {
    let keep = text.len().saturating_sub(excess + TRUNCATION_MARKER.len());
    if keep == 0 {
        return String::new();
    }
    let mut cut = keep;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

/// Builds initial and repair prompts within a byte budget.
///
/// Only the quoted previous output is ever shortened; the contract, error and
/// format sections are always sent in full.
pub struct PromptBuilder {
    budget_bytes: usize,
    instructions: String,
}

impl PromptBuilder {
    /// Create a builder with the given byte budget for the system turn.
    pub fn new(budget_bytes: usize) -> Self {
        let instructions = ENGINE.render("instructions", minijinja::Value::from_serialize(&LIMITS));
        Self {
            budget_bytes,
            instructions: instructions.trim().to_string(),
        }
    }

    /// Base story instructions repeated at the top of every prompt.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Prompt for the first generation attempt.
    pub fn initial(&self, theme: &str) -> Prompt {
        let rendered = ENGINE.render(
            "story",
            context! {
                instructions => self.instructions.as_str(),
                document_schema => DOCUMENT_SCHEMA.trim(),
                node_schema => NODE_SCHEMA.trim(),
            },
        );
        Prompt {
            system: render_sections(&parse_sections(&rendered)),
            user: format!("Create the story with this theme: {}", theme.trim()),
        }
    }

    /// Prompt asking for the whole document again, quoting the rejected output
    /// and the error that rejected it.
    pub fn build_document_repair(&self, previous_raw: &str, error: &ValidationError) -> Prompt {
        let error = error.to_string();
        let system = self.render_within_budget(previous_raw, |previous| {
            ENGINE.render(
                "document_repair",
                context! {
                    instructions => self.instructions.as_str(),
                    error => error.as_str(),
                    previous => previous,
                    document_schema => DOCUMENT_SCHEMA.trim(),
                    node_schema => NODE_SCHEMA.trim(),
                    ..minijinja::Value::from_serialize(&LIMITS)
                },
            )
        });
        Prompt {
            system,
            user: DOCUMENT_REPAIR_REQUEST.to_string(),
        }
    }

    /// Prompt asking for one corrected node, identified by its JSON path.
    pub fn build_node_repair(
        &self,
        previous_raw_node: &str,
        node_path: &str,
        error: &ValidationError,
    ) -> Prompt {
        let error = error.to_string();
        let system = self.render_within_budget(previous_raw_node, |previous| {
            ENGINE.render(
                "node_repair",
                context! {
                    instructions => self.instructions.as_str(),
                    error => error.as_str(),
                    previous => previous,
                    node_path => node_path,
                    node_schema => NODE_SCHEMA.trim(),
                    ..minijinja::Value::from_serialize(&LIMITS)
                },
            )
        });
        Prompt {
            system,
            user: NODE_REPAIR_REQUEST.to_string(),
        }
    }

    fn render_within_budget(&self, previous: &str, render: impl Fn(&str) -> String) -> String {
        let mut quoted = previous.trim().to_string();
        loop {
            let content = render_sections(&parse_sections(&render(&quoted)));
            if content.len() <= self.budget_bytes || quoted.is_empty() {
                return content;
            }
            let excess = content.len() - self.budget_bytes;
            debug!(
                bytes_over = excess,
                quoted_len = quoted.len(),
                "truncating quoted output for budget"
            );
            quoted = truncate_quoted(&quoted, excess);
        }
    }
}
