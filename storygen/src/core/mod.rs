//! Deterministic, pure logic for story generation.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod repair_state;
pub mod validator;
