//! Error types for serial-odbc.

use thiserror::Error;

/// Result type for serial-odbc operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error reported by a raw handle.
///
/// The message is kept exactly as the driver produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverError {
    /// Primary error message
    pub message: String,
    /// SQLSTATE code (5 characters), when the driver supplies one
    pub state: Option<String>,
    /// Native driver error code
    pub code: Option<i32>,
}

impl DriverError {
    /// Create a driver error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a SQLSTATE code.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(state) = &self.state {
            write!(f, " (SQLSTATE {})", state)?;
        }
        Ok(())
    }
}

/// Error type for serial-odbc.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation issued against a connection that is not open
    #[error("Connection not open.")]
    NotOpen,

    /// Error surfaced from the underlying raw handle
    #[error("{0}")]
    Driver(DriverError),

    /// A metadata call is missing a required field
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    /// The connection dropped and reopening it failed
    #[error("Reconnect failed: {0}")]
    ReconnectFailure(Box<Error>),

    /// Invalid usage (e.g., opening a connection twice)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// The pool has been drained and accepts no more checkouts
    #[error("Pool is closed")]
    PoolClosed,

    /// A column value could not be decoded into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Handles were created outside a Tokio runtime
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The operation was dropped before it reported completion
    #[error("Operation abandoned before completion")]
    Abandoned,
}

impl Error {
    /// Shorthand for a driver error carrying only a message.
    pub fn driver(message: impl Into<String>) -> Self {
        Error::Driver(DriverError::new(message))
    }

    /// Returns true if the operation was rejected because the connection is not open.
    pub fn is_not_open(&self) -> bool {
        matches!(self, Error::NotOpen)
    }

    /// Get the SQLSTATE code if this is a driver error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Driver(err) => err.state.as_deref(),
            Error::ReconnectFailure(inner) => inner.sqlstate(),
            _ => None,
        }
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}
