use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CubeClientError {
    #[error("Configuration Error: {0}")]
    ConfigurationError(String),

    #[error("Invalid Arguments: {0}")]
    InvalidArguments(String),

    /// The dataset uses a feature whose rows cannot be reconstructed.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    /// The server no longer knows the instance, typically because it expired.
    #[error("Stale Instance: {instance_id}")]
    StaleInstance { instance_id: String },

    /// The server gave up on the request because it exceeded its time budget.
    #[error("Request Timeout: {0}")]
    RequestTimeout(String),

    #[error("HTTP Error {status}: {message}")]
    HttpStatus { status: StatusCode, message: String },

    #[error("Reqwest Error: {0}")]
    ReqwestError(Arc<reqwest::Error>),

    #[error("Reqwest Middleware Error: {0}")]
    ReqwestMiddlewareError(Arc<reqwest_middleware::Error>),

    #[error("JSON Error: {0}")]
    JsonError(Arc<serde_json::Error>),

    #[error("URL Error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Other Error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CubeClientError>;

impl CubeClientError {
    pub fn internal<T: std::fmt::Debug>(value: T) -> Self {
        CubeClientError::Other(format!("Internal Error: {value:?}"))
    }

    pub fn is_stale_instance(&self) -> bool {
        matches!(self, CubeClientError::StaleInstance { .. })
    }

    pub fn is_request_timeout(&self) -> bool {
        matches!(self, CubeClientError::RequestTimeout(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CubeClientError::HttpStatus { status, .. } => Some(*status),
            CubeClientError::ReqwestError(e) => e.status(),
            CubeClientError::ReqwestMiddlewareError(e) => e.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CubeClientError {
    fn from(err: reqwest::Error) -> Self {
        CubeClientError::ReqwestError(Arc::new(err))
    }
}

impl From<reqwest_middleware::Error> for CubeClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => CubeClientError::from(e),
            e => CubeClientError::ReqwestMiddlewareError(Arc::new(e)),
        }
    }
}

impl From<serde_json::Error> for CubeClientError {
    fn from(err: serde_json::Error) -> Self {
        CubeClientError::JsonError(Arc::new(err))
    }
}

impl From<anyhow::Error> for CubeClientError {
    fn from(err: anyhow::Error) -> Self {
        CubeClientError::Other(format!("{err:#}"))
    }
}
