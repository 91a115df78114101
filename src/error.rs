use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Network connection failed: {0}")]
    ConnectionError(String),

    #[error("WebSocket error: {0}")]
    SocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Malformed '{kind}' payload: {source}")]
    PayloadError {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Internal channel closed")]
    ChannelClosed,

    #[error("Invalid URL")]
    UrlParseError(#[from] url::ParseError),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PulseError {
    /// Wrap a payload decode failure with the message type it belongs to.
    pub fn payload(kind: &str, source: serde_json::Error) -> Self {
        Self::PayloadError {
            kind: kind.to_string(),
            source,
        }
    }
}
