use serde::Serialize;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Every way a single conversion request can fail.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
    #[error("backend `{backend}` is not available: {detail}")]
    ToolNotAvailable { backend: String, detail: String },
    #[error("backend `{backend}` has no usable license: {detail}")]
    LicenseMissing { backend: String, detail: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backend `{backend}` failed (exit {exit_code:?}): {detail}")]
    ConversionFailed {
        backend: String,
        exit_code: Option<i32>,
        detail: String,
    },
    #[error("backend `{backend}` exceeded timeout of {timeout:?}")]
    Timeout { backend: String, timeout: Duration },
    #[error("backend `{0}` produced no Markdown output")]
    NoOutputProduced(String),
    #[error("{context}: {source}")]
    InternalError {
        context: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownBackend,
    ToolNotAvailable,
    LicenseMissing,
    InvalidInput,
    ConversionFailed,
    Timeout,
    NoOutputProduced,
    InternalError,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::UnknownBackend => "unknown_backend",
            ErrorKind::ToolNotAvailable => "tool_not_available",
            ErrorKind::LicenseMissing => "license_missing",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NoOutputProduced => "no_output_produced",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::UnknownBackend(_) => ErrorKind::UnknownBackend,
            ConvertError::ToolNotAvailable { .. } => ErrorKind::ToolNotAvailable,
            ConvertError::LicenseMissing { .. } => ErrorKind::LicenseMissing,
            ConvertError::InvalidInput(_) => ErrorKind::InvalidInput,
            ConvertError::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            ConvertError::Timeout { .. } => ErrorKind::Timeout,
            ConvertError::NoOutputProduced(_) => ErrorKind::NoOutputProduced,
            ConvertError::InternalError { .. } => ErrorKind::InternalError,
        }
    }

    pub fn internal(context: impl Into<String>, source: io::Error) -> Self {
        ConvertError::InternalError {
            context: context.into(),
            source,
        }
    }
}
