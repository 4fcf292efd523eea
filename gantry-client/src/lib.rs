//! Gantry HTTP Client
//!
//! A type-safe HTTP client for the worker-facing endpoints of the Gantry
//! queue service: claiming work and fetching pending cancellations.
//!
//! # Example
//!
//! ```no_run
//! use gantry_client::QueueClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry_client::ClientError> {
//!     let client = QueueClient::new("http://localhost:8080");
//!
//!     let claims = client.claim_work("worker-1", 2).await?;
//!     println!("claimed {} task(s)", claims.len());
//!     Ok(())
//! }
//! ```

pub mod error;
mod work;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Gantry queue API
///
/// Provides the worker-facing endpoints:
/// - Work claiming (`claim_work`)
/// - Cancellation delivery (`fetch_cancellations`)
#[derive(Debug, Clone)]
pub struct QueueClient {
    /// Base URL of the queue service (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl QueueClient {
    /// Create a new queue client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the queue API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new queue client with a custom HTTP client
    ///
    /// This allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the queue service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Handle an API response and deserialize JSON
    ///
    /// Checks the status code and returns an appropriate error if the
    /// request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::queue_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = QueueClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = QueueClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = QueueClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
