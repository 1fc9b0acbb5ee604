//! Gauntlet Core
//!
//! Core types for the Gauntlet integration-test harness.
//!
//! This crate contains the domain types shared by the runner and the CLI:
//! - Run identifiers that scope every artifact and endpoint of one run
//! - Runtime selection and its per-runtime conventions
//! - Endpoint descriptors, the name rewrite, and the persisted manifest
//! - Test suite results

pub mod domain;

pub use domain::endpoint::{EndpointConfig, EndpointSet, MAX_ENDPOINT_NAME_LEN, RewriteError};
pub use domain::manifest::{
    DiscoveredSpec, MANIFEST_FILE, MANIFEST_SPEC_VERSION, Manifest, ManifestError,
};
pub use domain::run::{RunId, RunIdError};
pub use domain::runtime::{Runtime, UnsupportedRuntime};
pub use domain::suite::TestResult;
