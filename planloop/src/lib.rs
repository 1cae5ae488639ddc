//! Plan-driven autonomous agent loop.
//!
//! This crate drives an external reasoning agent through a markdown plan
//! checklist: one task per iteration, one subprocess invocation per task,
//! until every task is done or blocked. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan parsing, selection,
//!   protocol decode). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (plan file rewrites, config,
//!   process execution). Isolated to enable scripted invokers in tests.
//!
//! The [`engine`] module coordinates core logic with I/O to implement the
//! loop itself; [`exit_codes`] and the `planloop` binary expose it as a CLI.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
