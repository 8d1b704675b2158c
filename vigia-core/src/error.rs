use thiserror::Error;

use crate::encoder::EncoderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Signal decode error: {0}")]
    Decode(#[from] vigia_proto::DecodeError),

    #[error("Manifest fetch error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Signal channel send failed: {0}")]
    ChannelSend(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session already stopped")]
    SessionStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
