use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The payload is too short to hold the 6-byte timestamp header.
    #[error("Malformed payload: {len} bytes, need at least 6")]
    MalformedPayload { len: usize },

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("Failed to write config: {0}")]
    ConfigWrite(#[from] ron::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid MIDI line: {0}")]
    InvalidMidiLine(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
