//! Error types for the console client.

/// Error from a backend REST call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("decode: {0}")]
    Decode(String),

    #[error("encode: {0}")]
    Encode(String),

    /// The backend answered 2xx but reported `success: false`.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Error from the live update channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid live channel url: {0}")]
    InvalidUrl(String),

    #[error("connect: {0}")]
    Connect(String),

    #[error("protocol: {0}")]
    Protocol(String),
}

/// Error returned by [`crate::console::BuildConsole`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("{0}")]
    Validation(String),

    #[error("a build is already being tracked")]
    Busy,

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type ApiResult<T> = Result<T, ApiError>;
