//! Branching story generation with validation and repair.
//!
//! A text model is prompted for a choose-your-own-adventure tree as JSON. The
//! output is validated, repaired through targeted follow-up prompts when it is
//! malformed, and then written to SQLite with stable parent → child option
//! edges. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (validation, shape invariants, the
//!   repair state machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, prompts, model process,
//!   storage). Isolated behind traits so tests can script them.
//!
//! Orchestration modules ([`repair`], [`materialize`], [`generate`]) coordinate
//! core logic with I/O. [`generate::StoryGenerator::generate_story`] is the
//! entry point.

pub mod core;
pub mod error;
pub mod generate;
pub mod io;
pub mod logging;
pub mod materialize;
pub mod repair;
pub mod story;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
