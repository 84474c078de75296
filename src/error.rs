//! Error taxonomy.
//!
//! Every failure that travels through the pipeline is an [`Error`], and every
//! [`Error`] carries exactly one kind. The kind alone decides the client-visible
//! status, the JSON body, whether the failure is logged, and whether the
//! process-level shutdown sequence starts:
//!
//! | Kind | Status | Logged | Shutdown |
//! |---|---|---|---|
//! | [`Error::Request`] | the declared one | only if ≥ 500 | no |
//! | [`Error::Authentication`] | 401 | no | no |
//! | [`Error::Authorization`] | 403 (401 without identity) | no | no |
//! | [`Error::Internal`] | 500 | yes | no |
//! | [`Error::Shutdown`] | 500 (last resort) | yes | yes |

use std::io;

use http::StatusCode;
use serde::Serialize;

/// Boxed error used as the source of internal failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure raised by a handler or a middleware.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Business or validation failure with an explicit status.
    #[error("{message}")]
    Request {
        status: StatusCode,
        message: String,
        fields: Vec<FieldError>,
    },

    /// Missing, malformed, expired or untrusted credential. The string is
    /// diagnostic only and never reaches the client.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A policy rule denied the request. `anonymous` is set when no identity
    /// was attached, which answers 401 instead of 403.
    #[error("authorization failed: {reason}")]
    Authorization { reason: String, anonymous: bool },

    /// Anything unexpected, including recovered panics.
    #[error("internal error: {0}")]
    Internal(#[source] BoxError),

    /// Integrity failure that must stop the process.
    #[error("shutdown requested: {0}")]
    Shutdown(String),
}

/// One invalid input field, reported in the `fields` array of the body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

/// The JSON body written for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorDocument {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl Error {
    pub fn request(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Request { status, message: message.into(), fields: Vec::new() }
    }

    /// 400 validation failure for a single field.
    pub fn field(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self::fields(vec![FieldError { field: field.into(), error: error.into() }])
    }

    /// 400 validation failure for several fields.
    pub fn fields(fields: Vec<FieldError>) -> Self {
        Self::Request {
            status: StatusCode::BAD_REQUEST,
            message: "data validation error".to_owned(),
            fields,
        }
    }

    pub fn authentication(detail: impl Into<String>) -> Self {
        Self::Authentication(detail.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Authorization { reason: reason.into(), anonymous: false }
    }

    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::Internal(source.into())
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::Shutdown(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request { status, .. } => *status,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization { anonymous: true, .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { anonymous: false, .. } => StatusCode::FORBIDDEN,
            Self::Internal(_) | Self::Shutdown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-visible body. Auth and internal failures only ever expose the
    /// reason phrase of their status.
    pub fn document(&self) -> ErrorDocument {
        match self {
            Self::Request { message, fields, .. } => ErrorDocument {
                error: message.clone(),
                fields: fields.clone(),
            },
            _ => ErrorDocument {
                error: self.status().canonical_reason().unwrap_or("Error").to_owned(),
                fields: Vec::new(),
            },
        }
    }

    pub fn should_log(&self) -> bool {
        match self {
            Self::Request { status, .. } => status.is_server_error(),
            Self::Authentication(_) | Self::Authorization { .. } => false,
            Self::Internal(_) | Self::Shutdown(_) => true,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }

    /// True when the failure is the peer going away mid-response (broken
    /// pipe, connection reset or aborted). These never escalate.
    pub fn is_broken_connection(&self) -> bool {
        let Self::Internal(source) = self else {
            return false;
        };
        let root: &(dyn std::error::Error + 'static) = &**source;
        let mut current = Some(root);
        while let Some(err) = current {
            if let Some(io) = err.downcast_ref::<io::Error>() {
                if matches!(
                    io.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                ) {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::internal(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(e)
    }
}

/// Infrastructure failures of [`Server`](crate::Server): binding the port.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
