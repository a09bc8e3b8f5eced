use thiserror::Error;

/// Failure of one SDP exchange with the gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The gateway (or the relay behind it) answered with a non-success status
    #[error("signaling rejected with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("signaling request failed: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("peer connection error: {0}")]
    Transport(String),

    #[error("stream has neither audio nor video")]
    NoMedia,

    #[error("connection was not established within {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("session closed: {0}")]
    Closed(String),

    #[error("orchestrator is not running")]
    Shutdown,

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
}

impl From<webrtc::Error> for ClientError {
    fn from(err: webrtc::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
