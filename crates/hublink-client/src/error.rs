// Error taxonomy for the broker runtime.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// An awaited response did not arrive before the deadline. Expected
    /// under normal operation; callers can match on [`ClientError::code`]
    /// to suppress noisy reporting.
    #[error("request timed out")]
    Timeout,

    /// A remote handler reported failure. The message is the remote's own
    /// error string when it provided one.
    #[error("{0}")]
    Broker(String),

    /// Argument or name validation failed at the call site.
    #[error("validation: {0}")]
    Validation(String),

    /// No transport is available for the send.
    #[error("not connected")]
    NotConnected,

    /// The underlying connection failed mid-operation.
    #[error("transport: {0}")]
    Transport(String),

    /// The client was destroyed while the operation was in flight.
    #[error("client destroyed")]
    Destroyed,

    #[error(transparent)]
    Wire(#[from] hublink_wire::Error),
}

impl ClientError {
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code per kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Broker(_) => "BROKER",
            Self::Validation(_) => "VALIDATION",
            Self::NotConnected | Self::Transport(_) => "TRANSPORT",
            Self::Destroyed => "DESTROYED",
            Self::Wire(_) => "WIRE",
        }
    }
}
