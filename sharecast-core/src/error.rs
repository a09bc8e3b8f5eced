use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The relay answered with a non-success status. The body is kept verbatim.
    #[error("Relay returned {status}: {body}")]
    Relay { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
