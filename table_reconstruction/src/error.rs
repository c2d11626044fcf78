use std::sync::Arc;

use cube_client::CubeClientError;
use thiserror::Error;

/// Errors that can occur while selecting objects and reconstructing a table.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TableReconstructionError {
    /// A selected id is not part of the dataset, or is malformed.
    #[error("Invalid object ID: '{0}'")]
    InvalidObjectId(String),

    /// A page is internally inconsistent or disagrees with the first page.
    #[error("Malformed Grid: {0}")]
    MalformedGrid(String),

    /// A page could not be fetched; the partial table is discarded.
    #[error("Fetch of page at offset {offset} failed: {source}")]
    FetchFailed { offset: usize, source: Arc<CubeClientError> },

    #[error("Not Supported: {0}")]
    NotSupported(String),

    #[error("Table reconstruction was cancelled")]
    Cancelled,

    #[error("Client Error: {0}")]
    ClientError(Arc<CubeClientError>),

    #[error("Configuration Error: {0}")]
    ConfigurationError(String),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, TableReconstructionError>;

impl TableReconstructionError {
    pub fn fetch_failed(offset: usize, source: CubeClientError) -> Self {
        TableReconstructionError::FetchFailed {
            offset,
            source: Arc::new(source),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        TableReconstructionError::MalformedGrid(message.into())
    }
}

impl From<CubeClientError> for TableReconstructionError {
    fn from(err: CubeClientError) -> Self {
        match err {
            CubeClientError::Unsupported(message) => TableReconstructionError::NotSupported(message),
            err => TableReconstructionError::ClientError(Arc::new(err)),
        }
    }
}

impl From<tokio::task::JoinError> for TableReconstructionError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TableReconstructionError::Cancelled
        } else {
            TableReconstructionError::InternalError(format!("Fetch task failed: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_dataset_is_not_supported() {
        let err = TableReconstructionError::from(CubeClientError::Unsupported("custom groups".into()));
        assert!(matches!(err, TableReconstructionError::NotSupported(m) if m == "custom groups"));

        let err = TableReconstructionError::from(CubeClientError::Other("boom".into()));
        assert!(matches!(err, TableReconstructionError::ClientError(_)));
    }
}
