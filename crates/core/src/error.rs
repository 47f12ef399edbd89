/// Result alias that carries the custom [`WobbleError`] type.
pub type Result<T> = std::result::Result<T, WobbleError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum WobbleError {
    /// Free-form error for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Input rejected before any state was touched.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Audio payload was not valid base64.
    #[error("audio payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The actuator does not offer the requested capability.
    #[error("actuator capability `{0}` is not available")]
    Unsupported(&'static str),
    /// The actuator offers the capability but the call failed.
    #[error("actuator command failed: {0}")]
    Actuator(String),
    /// The envelope engine could not process a chunk.
    #[error("envelope engine failed: {0}")]
    Engine(String),
}

impl WobbleError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns `true` when the error reports a missing capability rather than
    /// a failed call.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl From<&str> for WobbleError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for WobbleError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
