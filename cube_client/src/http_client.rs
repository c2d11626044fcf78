use cube_config::ClientConfig;
use http::{HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::debug;

use crate::error::{CubeClientError, Result};

pub const PROJECT_ID_HEADER: &str = "X-MSTR-ProjectID";
pub const TOTAL_COUNT_HEADER: &str = "x-mstr-total-count";

/// Builds the HTTP client shared by all requests of a `RemoteClient`.
///
/// Retries are not installed as middleware; they are applied per call by `RetryWrapper`
/// so that each API can decide which failures are retryable.
pub fn build_http_client(config: &ClientConfig) -> Result<ClientWithMiddleware> {
    let mut headers = HeaderMap::new();
    if !config.project_id.is_empty() {
        let value = HeaderValue::from_str(&config.project_id)
            .map_err(|e| CubeClientError::ConfigurationError(format!("Invalid project id header value: {e}")))?;
        headers.insert(PROJECT_ID_HEADER, value);
    }

    let reqwest_client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .build()?;

    debug!(
        request_timeout = ?config.request_timeout,
        user_agent = %config.user_agent,
        "Built HTTP client"
    );

    Ok(ClientBuilder::new(reqwest_client).build())
}
