//! Side-effecting operations: plan file rewrites, configuration, process
//! execution. Isolated from [`crate::core`] to enable scripted doubles in
//! tests.

pub mod config;
pub mod invoker;
pub mod plan_store;
pub mod process;
pub mod prompt;
