//! Encoder-control seam.
//!
//! Remote-control commands are forwarded to a local encoder-control
//! client (the streaming software's control socket). The engine depends
//! on it only through [`EncoderClient`]; connection management and the
//! concrete control protocol live in the wiring layer.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone)]
pub enum EncoderError {
    #[error("encoder not connected")]
    NotConnected,

    #[error("encoder call {action:?} failed: {message}")]
    Call { action: String, message: String },
}

/// Unsolicited state change pushed by the encoder (stream started or
/// stopped, record state, scene switch).
#[derive(Debug, Clone)]
pub struct EncoderEvent {
    pub event: String,
    pub data: serde_json::Value,
}

/// Local encoder-control client.
#[async_trait]
pub trait EncoderClient: Send + Sync {
    /// Invoke a control action and return its raw result payload.
    async fn call(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, EncoderError>;

    /// Subscribe to the encoder's own state-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<EncoderEvent>;
}
