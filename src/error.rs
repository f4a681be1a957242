//! The public error type. Internally the crate works with `anyhow` (`Res<T>`) and classifies
//! failures into an `ErrorType` at the boundary with `IntoResult::pub_result`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Internal result type.
pub(crate) type Res<T> = anyhow::Result<T>;

/// Public result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of failure, used to decide what the user is told and whether local state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Input was rejected locally before any remote call, e.g. an empty name.
    Validation,
    /// The target is a system category and cannot be mutated.
    Forbidden,
    /// The referenced category is not present in the local forest.
    NotFound,
    /// The same action is already in flight.
    Busy,
    /// The remote store refused the request.
    Rejected,
    /// The request to the remote store could not complete.
    Transport,
    /// One or more writes of a reorder batch failed.
    PartialBatch,
    /// The home directory or configuration file is missing or invalid.
    Config,
    /// Anything else.
    Internal,
}

serde_plain::derive_display_from_serialize!(ErrorType);

/// An error with an `ErrorType` classification and the underlying cause.
#[derive(Debug)]
pub struct Error {
    error_type: ErrorType,
    inner: anyhow::Error,
}

impl Error {
    pub fn new(error_type: ErrorType, inner: impl Into<anyhow::Error>) -> Self {
        Self {
            error_type,
            inner: inner.into(),
        }
    }

    /// Creates an error from a plain message.
    pub fn message(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::new(error_type, anyhow::Error::msg(message.into()))
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// True when the failure came from talking to the remote store rather than local checks.
    pub fn is_remote(&self) -> bool {
        matches!(
            self.error_type,
            ErrorType::Rejected | ErrorType::Transport | ErrorType::PartialBatch
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Converts an internal result into the public `Result` with the given classification.
pub(crate) trait IntoResult<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T, E> IntoResult<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| Error::new(error_type, e))
    }
}
