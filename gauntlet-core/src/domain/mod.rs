//! Core domain types
//!
//! These types are shared between the runner (which produces and consumes them
//! during a run) and the CLI (which inspects leftovers of past runs).

pub mod endpoint;
pub mod manifest;
pub mod run;
pub mod runtime;
pub mod suite;
