pub mod client;
pub mod events;
pub mod hub;

pub use client::Client;
pub use events::Stream;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("rejected: {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("declined: {reason}")]
    Declined { reason: String },
    #[error("invalid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("hub handshake failed: {0}")]
    Handshake(String),
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0}")]
    InvalidScheme(String),
}

impl Error {
    /// Whether the backend understood the request and refused it.
    ///
    /// Everything else (transport failures, 5xx, malformed bodies) leaves the
    /// outcome of the request unknown.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. } | Error::Declined { .. })
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
