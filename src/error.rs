use thiserror::Error;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// An address or method name could not be mapped to a contract method
    #[error("cannot resolve contract method: {0}")]
    Resolution(String),

    /// Two contract methods derive the same queue address
    #[error("duplicate address in contract: {0}")]
    DuplicateAddress(String),

    /// Request body carried the wrong number of arguments
    #[error("argument count mismatch: expected {expected}, received {actual}")]
    ArgumentCountMismatch { expected: usize, actual: usize },

    /// Request body supplied to a method that takes no arguments
    #[error("method `{0}` takes no arguments but the request has a body")]
    UnexpectedBody(String),

    /// `RpcServer::start` was called more than once
    #[error("server already started")]
    AlreadyStarted,

    /// The awaited reply was canceled before it arrived
    #[error("call canceled before a reply arrived")]
    CallCanceled,

    /// A pending call with this correlation id already exists
    #[error("correlation id already pending: {0}")]
    DuplicateCorrelation(String),

    /// Request timed out waiting for response
    #[error("request timed out")]
    Timeout,

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport level failure (publish, declare, consume, ack)
    #[error("transport error: {0}")]
    Transport(String),

    /// Envelope is missing metadata required by the protocol
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Contract implementation reported a failure
    #[error("implementation error: {0}")]
    Implementation(String),

    /// Required builder field was not supplied
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Builder fields contradict each other
    #[error("conflicting configuration: {0}")]
    ConfigConflict(String),
}

impl RpcError {
    /// Wrap an arbitrary error raised by a contract implementation.
    pub fn implementation(err: impl std::fmt::Display) -> Self {
        RpcError::Implementation(err.to_string())
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
