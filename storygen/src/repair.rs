//! Document repair loop: bounded generate → validate → repair attempts.
//!
//! Phases follow [`RepairPhase`]. Validation and transport failures share one
//! attempt budget; once a repair prompt has been issued it replaces the initial
//! prompt for every later attempt.

use tracing::{debug, info, instrument, warn};

use crate::core::repair_state::{RepairEvent, RepairPhase};
use crate::core::validator::{ROOT_PATH, check_document, validate, validate_node};
use crate::error::{AttemptError, GenerationError, ValidationError};
use crate::io::generator::Generator;
use crate::io::prompt::{Prompt, PromptBuilder};
use crate::story::{EmbeddedNode, MalformedNode, NodeSpec};

/// A story document whose root node is well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedDocument {
    pub title: String,
    pub root: NodeSpec,
    /// Generation attempts used, including the accepted one.
    pub attempts: u32,
}

/// Why an attempt's output was not accepted.
struct Rejection {
    /// Error describing the document text quoted in the next repair prompt.
    document_error: ValidationError,
    /// Last failure of the attempt, reported when the budget runs out.
    last_error: AttemptError,
}

impl Rejection {
    fn invalid(error: ValidationError) -> Self {
        Self {
            last_error: error.clone().into(),
            document_error: error,
        }
    }

    /// The inline root repair failed; the document repair still quotes the
    /// original document, so it carries the root's own error.
    fn root_repair_failed(malformed: &MalformedNode, last_error: AttemptError) -> Self {
        Self {
            document_error: malformed.error.clone(),
            last_error,
        }
    }
}

pub struct DocumentRepairLoop<'a, G: Generator> {
    generator: &'a G,
    prompts: &'a PromptBuilder,
    max_attempts: u32,
}

impl<'a, G: Generator> DocumentRepairLoop<'a, G> {
    pub fn new(generator: &'a G, prompts: &'a PromptBuilder, max_attempts: u32) -> Self {
        Self {
            generator,
            prompts,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run attempts until a document is accepted or the budget is spent.
    #[instrument(skip_all, fields(max_attempts = self.max_attempts))]
    pub fn run(&self, initial: Prompt) -> Result<AcceptedDocument, GenerationError> {
        let mut phase = RepairPhase::start();
        let mut prompt = initial;

        loop {
            let RepairPhase::Generating { attempt } = phase else {
                return Err(GenerationError::InvalidTransition {
                    from: phase,
                    event: RepairEvent::Generated,
                });
            };
            info!(attempt = attempt + 1, "generating story document");

            let raw = match self.generator.generate(&prompt) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "generation failed");
                    phase = self.advance(phase, RepairEvent::TransportFailed)?;
                    if let RepairPhase::Exhausted { attempts } = phase {
                        return Err(exhausted(attempts, err.into()));
                    }
                    continue;
                }
            };
            phase = self.advance(phase, RepairEvent::Generated)?;

            let rejection = match self.accept(&raw) {
                Ok((title, root)) => {
                    return match self.advance(phase, RepairEvent::Validated)? {
                        RepairPhase::Accepted { attempt } => {
                            info!(attempt = attempt + 1, %title, "story document accepted");
                            Ok(AcceptedDocument {
                                title,
                                root,
                                attempts: attempt + 1,
                            })
                        }
                        other => Err(GenerationError::InvalidTransition {
                            from: other,
                            event: RepairEvent::Validated,
                        }),
                    };
                }
                Err(rejection) => rejection,
            };
            warn!(
                attempt = attempt + 1,
                error = %rejection.last_error,
                "story document rejected"
            );

            phase = self.advance(phase, RepairEvent::Rejected)?;
            if let RepairPhase::Exhausted { attempts } = phase {
                return Err(exhausted(attempts, rejection.last_error));
            }

            prompt = self
                .prompts
                .build_document_repair(&raw, &rejection.document_error);
            debug!(prompt_bytes = prompt.len(), "document repair prompt built");
            phase = self.advance(phase, RepairEvent::RepairPrompted)?;
        }
    }

    fn advance(
        &self,
        phase: RepairPhase,
        event: RepairEvent,
    ) -> Result<RepairPhase, GenerationError> {
        phase
            .next(event, self.max_attempts)
            .ok_or(GenerationError::InvalidTransition { from: phase, event })
    }

    /// Validate the document and make sure its root is usable, repairing a
    /// malformed root once inline.
    fn accept(&self, raw: &str) -> Result<(String, NodeSpec), Rejection> {
        let document = validate(raw).map_err(Rejection::invalid)?;
        match document.root_node {
            EmbeddedNode::Valid(root) => Ok((document.title, *root)),
            EmbeddedNode::Malformed(malformed) => {
                let root = self.repair_root(&malformed)?;
                Ok((document.title, root))
            }
        }
    }

    fn repair_root(&self, malformed: &MalformedNode) -> Result<NodeSpec, Rejection> {
        info!(error = %malformed.error, "root node invalid, requesting inline repair");
        let prompt =
            self.prompts
                .build_node_repair(&malformed.raw_text(), &malformed.path, &malformed.error);
        let repaired = self
            .generator
            .generate(&prompt)
            .map_err(|err| Rejection::root_repair_failed(malformed, err.into()))?;
        let root = validate_node(&repaired, ROOT_PATH)
            .and_then(|root| check_document(&root).map(|()| root))
            .map_err(|err| {
                warn!(error = %err, "inline root repair rejected");
                Rejection::root_repair_failed(malformed, err.into())
            })?;
        Ok(root)
    }
}

fn exhausted(attempts: u32, last_error: AttemptError) -> GenerationError {
    warn!(attempts, error = %last_error, "story generation attempts exhausted");
    GenerationError::RetryBudgetExhausted {
        attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::test_support::{ScriptedGenerator, document_json, ending, node_json, two_level_story};
    use serde_json::json;

    fn initial(prompts: &PromptBuilder) -> Prompt {
        prompts.initial("fantasy")
    }

    fn errors_section(system: &str) -> &str {
        let start = system.find("<errors>").expect("errors open");
        let end = system.find("</errors>").expect("errors close");
        &system[start..end]
    }

    fn valid_document() -> String {
        document_json("The Fork", &two_level_story())
    }

    fn broken_root_document() -> String {
        json!({
            "title": "The Fork",
            "rootNode": { "content": "You stand at a fork.", "options": [] }
        })
        .to_string()
    }

    #[test]
    fn first_valid_document_is_accepted() {
        let generator = ScriptedGenerator::new(vec![Ok(valid_document())]);
        let prompts = PromptBuilder::new(40_000);

        let accepted = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .expect("accepted");

        assert_eq!(accepted.title, "The Fork");
        assert_eq!(accepted.root, two_level_story());
        assert_eq!(accepted.attempts, 1);
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn invalid_output_is_repaired_with_error_context() {
        let generator =
            ScriptedGenerator::new(vec![Ok("{\"title\": ".to_string()), Ok(valid_document())]);
        let prompts = PromptBuilder::new(40_000);

        let accepted = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .expect("accepted");

        assert_eq!(accepted.attempts, 2);
        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], initial(&prompts));
        assert_eq!(requests[1].user, "Fix the JSON and return it.");
        assert!(requests[1].system.contains("{\"title\":"));
        assert!(requests[1].system.contains("invalid JSON"));
    }

    #[test]
    fn same_invalid_output_exhausts_after_exact_budget() {
        let generator = ScriptedGenerator::repeating("not a story");
        let prompts = PromptBuilder::new(40_000);

        let err = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .unwrap_err();

        assert_eq!(generator.calls(), 3);
        match err {
            GenerationError::RetryBudgetExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    last_error,
                    AttemptError::Validation(ValidationError::Decode { .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn transport_failure_consumes_an_attempt_without_repair() {
        let generator = ScriptedGenerator::new(vec![
            Err(TransportError::new("connection reset")),
            Ok(valid_document()),
        ]);
        let prompts = PromptBuilder::new(40_000);

        let accepted = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .expect("accepted");

        assert_eq!(accepted.attempts, 2);
        let requests = generator.requests();
        assert_eq!(requests[0], requests[1]);
    }

    #[test]
    fn repair_prompt_is_kept_after_transport_failure() {
        let generator = ScriptedGenerator::new(vec![
            Ok("garbage".to_string()),
            Err(TransportError::new("timeout")),
            Ok(valid_document()),
        ]);
        let prompts = PromptBuilder::new(40_000);

        let accepted = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .expect("accepted");

        assert_eq!(accepted.attempts, 3);
        let requests = generator.requests();
        assert_ne!(requests[1], initial(&prompts));
        assert_eq!(requests[1], requests[2]);
    }

    #[test]
    fn only_transport_failures_report_transport_error() {
        let generator = ScriptedGenerator::new(vec![
            Err(TransportError::new("down")),
            Err(TransportError::new("down")),
        ]);
        let prompts = PromptBuilder::new(40_000);

        let err = DocumentRepairLoop::new(&generator, &prompts, 2)
            .run(initial(&prompts))
            .unwrap_err();

        assert!(matches!(
            err,
            GenerationError::RetryBudgetExhausted {
                attempts: 2,
                last_error: AttemptError::Transport(_)
            }
        ));
    }

    #[test]
    fn malformed_root_is_repaired_inline() {
        let generator = ScriptedGenerator::new(vec![
            Ok(broken_root_document()),
            Ok(node_json(&two_level_story())),
        ]);
        let prompts = PromptBuilder::new(40_000);

        let accepted = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .expect("accepted");

        assert_eq!(accepted.attempts, 1);
        assert_eq!(accepted.root, two_level_story());
        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].user, "Fix the node JSON and return it.");
        assert!(requests[1].system.contains("`rootNode`"));
    }

    #[test]
    fn failed_root_repair_falls_through_to_document_repair() {
        let generator = ScriptedGenerator::new(vec![
            Ok(broken_root_document()),
            Ok(node_json(&ending("Still no branches", false))),
            Ok(valid_document()),
        ]);
        let prompts = PromptBuilder::new(40_000);

        let accepted = DocumentRepairLoop::new(&generator, &prompts, 3)
            .run(initial(&prompts))
            .expect("accepted");

        assert_eq!(accepted.attempts, 2);
        let requests = generator.requests();
        assert_eq!(requests.len(), 3);
        let document_repair = &requests[2];
        assert_eq!(document_repair.user, "Fix the JSON and return it.");
        assert!(document_repair.system.contains("You stand at a fork."));
        let errors = errors_section(&document_repair.system);
        assert!(errors.contains("rootNode"));
        assert!(errors.contains("isEnding"));
        assert!(!errors.contains("no path to an ending"));
        assert!(!document_repair.system.contains("Still no branches"));
    }

    #[test]
    fn exhaustion_after_failed_root_repair_reports_the_repair_error() {
        let generator = ScriptedGenerator::new(vec![
            Ok(broken_root_document()),
            Ok(node_json(&ending("Still no branches", false))),
        ]);
        let prompts = PromptBuilder::new(40_000);

        let err = DocumentRepairLoop::new(&generator, &prompts, 1)
            .run(initial(&prompts))
            .unwrap_err();

        let GenerationError::RetryBudgetExhausted { attempts, last_error } = err else {
            panic!("expected exhaustion");
        };
        assert_eq!(attempts, 1);
        assert!(last_error.to_string().contains("no path to an ending"));
    }
}
