use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while talking to the controller or serving its state
#[derive(Error, Debug)]
pub enum BridgeError {
    /// I/O error on the controller socket or a sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Controller closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// No controller socket is installed (connecting or bootstrapping)
    #[error("Controller link is not connected")]
    NotConnected,

    /// Write hit a broken pipe
    #[error("Broken pipe")]
    BrokenPipe,

    /// Request timed out waiting for a controller response
    #[error("Request timeout")]
    Timeout,

    /// Controller answered with something we cannot use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Command request is malformed or names an unsupported action
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Remote sink descriptor could not be parsed
    #[error("Invalid sink: {0}")]
    InvalidSink(String),

    /// Hardware address could not be parsed
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl BridgeError {
    /// Whether this error means the controller link is down rather than the
    /// request being wrong
    pub fn is_link_down(&self) -> bool {
        matches!(
            self,
            BridgeError::BrokenPipe | BridgeError::NotConnected | BridgeError::ConnectionClosed
        )
    }
}
