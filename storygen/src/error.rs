//! Error taxonomy for story generation.
//!
//! Validation and transport failures are recovered by the document repair loop
//! up to its attempt budget. Everything in [`GenerationError`] is surfaced to
//! the caller and aborts the enclosing storage transaction.

use crate::core::repair_state::{RepairEvent, RepairPhase};
use crate::io::store::StoreError;

/// Raw model output could not be turned into a typed document or node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Text is not parseable as JSON at all.
    #[error("invalid JSON: {message}")]
    Decode { message: String },
    /// Well-formed JSON that violates field or shape rules.
    #[error("schema validation failed:\n- {}", .errors.join("\n- "))]
    Schema { errors: Vec<String> },
}

impl ValidationError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn schema(errors: Vec<String>) -> Self {
        Self::Schema { errors }
    }
}

/// The generation endpoint itself failed (spawn, exit status, timeout, I/O).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("generation transport failed: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Why a single generation attempt (document or node) did not yield a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fatal outcome of a `generate_story` call.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("failed to generate a valid story after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        attempts: u32,
        last_error: AttemptError,
    },
    #[error("failed to repair invalid node at {path}: {source}")]
    NodeRepair { path: String, source: AttemptError },
    #[error("story rejected before storage: {0}")]
    Validation(ValidationError),
    #[error("story storage failed: {0}")]
    Storage(#[from] StoreError),
    #[error("repair loop cannot apply {event:?} in phase {from:?}")]
    InvalidTransition { from: RepairPhase, event: RepairEvent },
}
