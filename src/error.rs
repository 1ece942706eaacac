//! Error types for the mock server engine.
//!
//! [`MockError`] covers setup, lifecycle, and outbound failures.
//! [`RequestError`] is what a handler returns for a single request and
//! converts directly into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::StoreError;

/// Errors raised while loading, running, or stopping the engine.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// The configuration source could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        /// Location of the configuration source.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid YAML for the model.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration parsed but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A template could not be rendered.
    #[error("failed to render template {name}: {message}")]
    Render {
        /// Logical template name, used for diagnostics.
        name: String,
        /// Renderer error text.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An outbound HTTP call failed.
    #[error("outbound request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The listener could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server task ended with an error.
    #[error("serve error: {0}")]
    Serve(String),

    /// `start` or `setup_handler` was called while the server or its
    /// webhooks are still running.
    #[error("mock server is already running")]
    AlreadyRunning,
}

/// Result alias for engine operations.
pub type Result<T, E = MockError> = std::result::Result<T, E>;

/// Failure of a single request. Rendered as a plain-text body.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request could not be decoded or a template failed.
    #[error("{0}")]
    BadRequest(String),

    /// No record or collection matched.
    #[error("{0}")]
    NotFound(String),

    /// The route exists but not for this method.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// An upstream service (proxy target, fetch URL) failed.
    #[error("{0}")]
    Upstream(String),

    /// Unexpected internal failure.
    #[error("{0}")]
    Internal(String),
}

impl RequestError {
    /// HTTP status carried by this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for RequestError {
    fn from(err: StoreError) -> Self {
        Self::NotFound(err.to_string())
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
