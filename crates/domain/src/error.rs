/// Shared error type used across all callrelay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("telephony ({status}): {message}")]
    Telephony {
        status: u16,
        /// Provider-specific error code, when the response carried one.
        code: Option<u32>,
        message: String,
    },

    #[error("voice agent: {0}")]
    Agent(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
