// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error taxonomy for the inference pipeline.
//!
//! Handler code reports failures as [`HandlerError`]. Before a failure leaves
//! [`Transformer::transform`](crate::Transformer::transform) it is converted
//! into an [`InferenceError`], which is one of two kinds:
//!
//! - [`ToolkitError`]: a deliberate, well-formed failure with an explicit
//!   transport status code (e.g. an unsupported content type).
//! - [`GenericError`]: anything else, always mapped to status 500 with the
//!   original error rendered as the message.
//!
//! Both kinds carry the trace captured at the point of conversion.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::{self, Write as _};

use thiserror::Error;

use crate::environment::ConfigError;
use crate::handler::Stage;
use crate::resolver::ValidationError;

/// Transport status codes used by the pipeline.
pub mod status {
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_ACCEPTABLE: u16 = 406;
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    /// Standard reason phrase for a status code.
    pub fn reason_phrase(code: u16) -> &'static str {
        match code {
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            415 => "Unsupported Media Type",
            422 => "Unprocessable Entity",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown Status",
        }
    }
}

/// Result type returned by handler functions.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// A deliberate failure carrying the status code to report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolkitError {
    status_code: u16,
    message: String,
    phrase: Option<String>,
}

impl ToolkitError {
    /// Create an error with an explicit status code.
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            phrase: None,
        }
    }

    /// Request body or parameters could not be interpreted.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(status::BAD_REQUEST, message)
    }

    /// No decoder or encoder exists for the content type.
    pub fn unsupported_format(content_type: &str) -> Self {
        Self::new(
            status::UNSUPPORTED_MEDIA_TYPE,
            format!(
                "Content type {} is not supported by this framework. Please implement \
                 input_fn to deserialize the request data or an output_fn to serialize \
                 the response.",
                content_type
            ),
        )
    }

    /// Override the reason phrase reported with the status code.
    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrase = Some(phrase.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Reason phrase: the explicit one if set, else the standard phrase.
    pub fn phrase(&self) -> &str {
        self.phrase
            .as_deref()
            .unwrap_or_else(|| status::reason_phrase(self.status_code))
    }
}

/// Any failure not raised as a [`ToolkitError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GenericError {
    message: String,
}

impl GenericError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Always 500.
    pub fn status_code(&self) -> u16 {
        status::INTERNAL_SERVER_ERROR
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure reported by a handler function.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Deliberate failure with a status code.
    #[error(transparent)]
    Toolkit(#[from] ToolkitError),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Create an untyped failure from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Other(anyhow::Error::msg(message))
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(err.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(err.into())
    }
}

impl From<std::string::FromUtf8Error> for HandlerError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::Other(err.into())
    }
}

impl From<std::str::Utf8Error> for HandlerError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Other(err.into())
    }
}

/// A per-request failure after classification.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("{error}")]
    Toolkit { error: ToolkitError, trace: String },

    #[error("{error}")]
    Generic { error: GenericError, trace: String },
}

impl InferenceError {
    /// Classify a handler failure, capturing its trace.
    pub fn from_handler_error(err: HandlerError) -> Self {
        match err {
            HandlerError::Toolkit(error) => {
                let trace = render_trace(&error, None);
                Self::Toolkit { error, trace }
            }
            HandlerError::Other(err) => {
                let trace = render_trace(&*err, Some(err.backtrace()));
                Self::Generic {
                    error: GenericError::new(err.to_string()),
                    trace,
                }
            }
        }
    }

    /// Classify an initialization failure hit while serving a request.
    pub fn from_init_error(err: InitError) -> Self {
        match err {
            InitError::Handler { source, .. } => Self::from_handler_error(source),
            other => {
                let trace = render_trace(&other, None);
                Self::Generic {
                    error: GenericError::new(other.to_string()),
                    trace,
                }
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Toolkit { error, .. } => error.status_code(),
            Self::Generic { error, .. } => error.status_code(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Toolkit { error, .. } => error.message(),
            Self::Generic { error, .. } => error.message(),
        }
    }

    pub fn phrase(&self) -> &str {
        match self {
            Self::Toolkit { error, .. } => error.phrase(),
            Self::Generic { error, .. } => status::reason_phrase(error.status_code()),
        }
    }

    pub fn trace(&self) -> &str {
        match self {
            Self::Toolkit { trace, .. } | Self::Generic { trace, .. } => trace,
        }
    }

    pub fn is_toolkit(&self) -> bool {
        matches!(self, Self::Toolkit { .. })
    }
}

impl From<HandlerError> for InferenceError {
    fn from(err: HandlerError) -> Self {
        Self::from_handler_error(err)
    }
}

/// Failure while binding handlers or loading the model.
///
/// No request can be served after one of these, so they propagate to the
/// caller instead of being turned into a response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitError {
    /// Environment snapshot could not be built.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Handler module failed validation.
    #[error("invalid handler module: {0}")]
    Validation(#[from] ValidationError),

    /// A handler run during initialization failed.
    #[error("{stage} failed: {source}")]
    Handler {
        /// Stage that failed.
        stage: Stage,
        /// Error returned by the handler.
        #[source]
        source: HandlerError,
    },
}

/// Error chain followed by the backtrace when one was captured.
fn render_trace(err: &(dyn std::error::Error + 'static), backtrace: Option<&Backtrace>) -> String {
    let mut trace = format!("Error: {}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(trace, "\nCaused by: {}", cause);
        source = cause.source();
    }

    let captured;
    let backtrace = match backtrace {
        Some(bt) => bt,
        None => {
            captured = Backtrace::capture();
            &captured
        }
    };
    if backtrace.status() == BacktraceStatus::Captured {
        let _ = write!(trace, "\nStack backtrace:\n{}", backtrace);
    }
    trace
}
