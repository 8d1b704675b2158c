//! Outbound signal-channel seam.
//!
//! The engine only ever *sends* through this trait; inbound events are
//! validated by `vigia-proto` and pushed into the session queue by the
//! channel adapter. The adapter (socket transport, reconnect/backoff,
//! auth) lives in the wiring layer.

use async_trait::async_trait;
use vigia_proto::OutboundMessage;

use crate::Result;

/// Upstream sender for the signaling channel.
///
/// Sends are best-effort from the engine's point of view: failures are
/// logged by the caller, never escalated into state transitions. A
/// disconnected channel surfaces separately as a `ChannelStatus` event.
#[async_trait]
pub trait SignalOutbound: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}
