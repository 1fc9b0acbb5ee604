//! Gauntlet clients
//!
//! Clients for the two external parties of a harness run:
//! - The deploying backend, reached through the [`DeployClient`] capability
//!   (implemented by [`ToolDeployClient`] over the platform's deploy tool)
//! - The local admin server, reached over HTTP by [`AdminClient`] to read
//!   the declared endpoint set
//!
//! # Example
//!
//! ```no_run
//! use gauntlet_client::{DeployClient, EndpointFilter, ToolDeployClient};
//!
//! # async fn example() -> gauntlet_client::Result<()> {
//! let client = ToolDeployClient::new("firebase");
//! let endpoints = client
//!     .list_endpoints(&EndpointFilter {
//!         project: "my-project".to_string(),
//!         region: None,
//!     })
//!     .await?;
//! println!("{} endpoint(s) deployed", endpoints.len());
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod deploy;
pub mod error;
mod tool;

// Re-export commonly used types
pub use admin::AdminClient;
pub use deploy::{DeleteOptions, DeployClient, DeployOptions, DeployedEndpoint, EndpointFilter};
pub use error::{ClientError, Result};
pub use tool::ToolDeployClient;
