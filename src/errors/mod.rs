/// Unified error handling module
use thiserror::Error;

/// Every way a request can fail. Each variant maps to exactly one outbound
/// error event.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("DSO not found: {name}: {detail}")]
    DsoNotFound { name: String, detail: String },

    #[error("SSO not found: {name}: {detail}")]
    SsoNotFound { name: String, detail: String },

    #[error("stop time {stop} is not after start time {start}")]
    TimeRange { start: String, stop: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("catalogue unavailable: {0}")]
    CatalogueUnavailable(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Outbound error event kinds, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DsoNotFound,
    SsoNotFound,
    TimeInput,
    Generic,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DsoNotFound => "DSO_not_found",
            ErrorKind::SsoNotFound => "SSO_not_found",
            ErrorKind::TimeInput => "time_input_error",
            ErrorKind::Generic => "error",
        }
    }
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::DsoNotFound { .. } => ErrorKind::DsoNotFound,
            ResolveError::SsoNotFound { .. } => ErrorKind::SsoNotFound,
            ResolveError::TimeRange { .. } => ErrorKind::TimeInput,
            ResolveError::Protocol(_)
            | ResolveError::Generation(_)
            | ResolveError::CatalogueUnavailable(_)
            | ResolveError::InvalidTransition { .. } => ErrorKind::Generic,
        }
    }

    /// Detail carried by the error event. Catalogue text is passed through
    /// verbatim; everything else uses the local message.
    pub fn detail(&self) -> Option<String> {
        match self {
            ResolveError::DsoNotFound { detail, .. } | ResolveError::SsoNotFound { detail, .. } => {
                Some(detail.clone())
            }
            ResolveError::TimeRange { .. } => None,
            other => Some(other.to_string()),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ResolveError::Protocol(msg.into())
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => {
                ResolveError::CatalogueUnavailable(format!("upstream status {}: {}", status, err))
            }
            None => ResolveError::CatalogueUnavailable(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Generation(err.to_string())
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::CatalogueUnavailable(format!("malformed catalogue response: {}", err))
    }
}

/// Type alias for resolution results
pub type ResolveResult<T> = Result<T, ResolveError>;
