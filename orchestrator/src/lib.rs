//! Human-supervised task-automation loop.
//!
//! Each step asks one backend for a draft, a second for a review, and the
//! first again for the final commands. The commands pass a safety gate, run
//! under a timeout, and a done check on the durable result decides whether
//! the loop continues. Jobs that cannot proceed halt in STOP until a human
//! decision resumes or fails them.
//!
//! - **[`core`]**: pure, deterministic logic (parser, gate, state
//!   transitions, records). No I/O.
//! - **[`io`]**: side effects (config, processes, HTTP backends, job and
//!   step files, notifications).
//!
//! Orchestration modules ([`pipeline`], [`step`], [`looping`], [`job`],
//! [`summary`]) combine the two to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod job;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod step;
pub mod summary;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
