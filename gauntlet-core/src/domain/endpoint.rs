//! Endpoint descriptors and the per-run name rewrite
//!
//! Discovered endpoints are renamed to `<runId>-<originalName>` so that
//! concurrent runs never collide and cleanup can match them unambiguously.

use std::collections::BTreeMap;

use thiserror::Error;

use super::run::RunId;

/// Longest endpoint name the deploying platform accepts
pub const MAX_ENDPOINT_NAME_LEN: usize = 100;

/// Attributes the deploy target supplies itself; never carried from discovery
pub const RESERVED_ATTRIBUTES: [&str; 2] = ["project", "runtime"];

/// Endpoint configuration: opaque attributes (trigger, region, memory, ...)
pub type EndpointConfig = BTreeMap<String, serde_json::Value>;

/// Endpoint name to configuration
pub type EndpointSet = BTreeMap<String, EndpointConfig>;

/// Errors raised while rewriting a discovered endpoint set
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error(
        "endpoint '{original}' renamed to '{rewritten}' exceeds the {max}-character limit ({len} characters)"
    )]
    NameTooLong {
        original: String,
        rewritten: String,
        len: usize,
        max: usize,
    },
}

/// Computes the run-scoped name of an endpoint
pub fn rewrite_name(run_id: &RunId, name: &str) -> String {
    format!("{}-{}", run_id, name)
}

/// Renames every endpoint for this run and strips the reserved attributes
///
/// Fails on the first rewritten name longer than [`MAX_ENDPOINT_NAME_LEN`],
/// leaving nothing partially rewritten.
pub fn rewrite_endpoints(run_id: &RunId, endpoints: EndpointSet) -> Result<EndpointSet, RewriteError> {
    let mut rewritten = EndpointSet::new();

    for (name, mut config) in endpoints {
        let new_name = rewrite_name(run_id, &name);
        let len = new_name.chars().count();
        if len > MAX_ENDPOINT_NAME_LEN {
            return Err(RewriteError::NameTooLong {
                original: name,
                rewritten: new_name,
                len,
                max: MAX_ENDPOINT_NAME_LEN,
            });
        }

        for attr in RESERVED_ATTRIBUTES {
            config.remove(attr);
        }

        rewritten.insert(new_name, config);
    }

    Ok(rewritten)
}
