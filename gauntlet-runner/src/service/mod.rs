//! Service layer
//!
//! One service per stage of a run. Stages with external side effects are
//! trait-based so the orchestrator can be exercised with test doubles.

pub mod cleanup;
pub mod deployment;
pub mod discovery;
pub mod staging;
pub mod suite;

// Re-export traits
pub use discovery::DiscoveryService;
pub use staging::StagingService;
pub use suite::SuiteService;

// Re-export implementations
pub use cleanup::{CleanupCoordinator, CleanupReport, delete_run_endpoints};
pub use deployment::{DeployPolicy, DeployTarget, DeploymentDriver};
pub use discovery::StandardDiscoveryService;
pub use staging::StandardStagingService;
pub use suite::StandardSuiteService;
