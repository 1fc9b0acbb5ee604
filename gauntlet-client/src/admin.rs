//! Admin server client
//!
//! The admin server is a transient local process that loads the compiled
//! function project and answers introspection requests without invoking
//! any function.

use gauntlet_core::DiscoveredSpec;
use reqwest::Client;

use crate::error::{ClientError, Result};

/// Path serving the declared endpoint set
pub const SPEC_PATH: &str = "/__/functions.yaml";

/// Path asking the admin server to exit
pub const QUIT_PATH: &str = "/__/quitquitquit";

/// HTTP client for a local admin server
#[derive(Debug, Clone)]
pub struct AdminClient {
    /// Base URL of the admin server (e.g., "http://127.0.0.1:8081")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl AdminClient {
    /// Create a client for an admin server at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client for an admin server listening on a loopback port
    pub fn for_port(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{}", port))
    }

    /// Create a client with a custom HTTP client (timeouts, proxies, ...)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the raw endpoint declaration
    pub async fn fetch_spec_text(&self) -> Result<String> {
        let url = format!("{}{}", self.base_url, SPEC_PATH);
        let response = self.client.get(&url).send().await?;

        self.handle_text_response(response).await
    }

    /// Fetch and parse the endpoint declaration
    pub async fn fetch_spec(&self) -> Result<DiscoveredSpec> {
        let text = self.fetch_spec_text().await?;
        DiscoveredSpec::from_yaml(&text).map_err(|e| ClientError::ParseError(e.to_string()))
    }

    /// Ask the admin server to shut itself down
    pub async fn quit(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, QUIT_PATH);
        let response = self.client.get(&url).send().await?;

        self.handle_text_response(response).await.map(|_| ())
    }

    /// Check the status code and return the body text
    async fn handle_text_response(&self, response: reqwest::Response) -> Result<String> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .text()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to read response body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = AdminClient::new("http://127.0.0.1:8081/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8081");
        assert_eq!(AdminClient::for_port(9000).base_url(), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_fetch_spec() {
        let app = Router::new().route(
            SPEC_PATH,
            get(|| async { "specVersion: v1alpha1\nendpoints:\n  httpFn:\n    httpsTrigger: {}\n" }),
        );
        let client = AdminClient::new(serve(app).await);

        let spec = client.fetch_spec().await.unwrap();
        assert!(spec.endpoints.contains_key("httpFn"));
        assert_eq!(spec.spec_version.as_deref(), Some("v1alpha1"));
    }

    #[tokio::test]
    async fn test_fetch_spec_error_status() {
        let app = Router::new().route(
            SPEC_PATH,
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = AdminClient::new(serve(app).await);

        let err = client.fetch_spec().await.unwrap_err();
        assert!(matches!(err, ClientError::ApiError { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_quit() {
        let app = Router::new().route(QUIT_PATH, get(|| async { "ok" }));
        let client = AdminClient::new(serve(app).await);
        assert!(client.quit().await.is_ok());
    }
}
