//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take timestamps as arguments, so every outcome is
//! reproducible in tests.

pub mod backoff;
pub mod decision;
pub mod gate;
pub mod job_state;
pub mod parser;
pub mod payload;
pub mod spec_audit;
pub mod step_record;
pub mod template;
pub mod text;
pub mod types;
