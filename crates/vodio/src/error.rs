use reqwest::StatusCode;

use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("a download for `{key}` is already active")]
    AlreadyActive { key: String },

    #[error("`{key}` is already downloaded")]
    AlreadyCompleted { key: String },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn already_active(key: impl Into<String>) -> Self {
        Self::AlreadyActive { key: key.into() }
    }

    pub fn already_completed(key: impl Into<String>) -> Self {
        Self::AlreadyCompleted { key: key.into() }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    /// Whether retrying the same request can plausibly succeed.
    ///
    /// Drives the per-segment retry on the adaptive path: transient transport
    /// failures and server-side statuses retry, everything that reflects the
    /// content or the caller's own state does not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::Manifest { .. }
            | Self::Validation { .. }
            | Self::AlreadyActive { .. }
            | Self::AlreadyCompleted { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. } | Self::Io { .. } | Self::Storage { .. } => true,
        }
    }
}

impl From<StorageError> for DownloadError {
    fn from(err: StorageError) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}
