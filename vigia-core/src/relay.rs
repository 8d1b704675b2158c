//! Remote-control command relay.
//!
//! Commands arriving over the signal channel are forwarded to the local
//! encoder-control client; when a correlation id is present, exactly one
//! result is emitted upstream per command. The relay also drains the
//! encoder's own state-change notifications and re-emits them upstream
//! unprompted, so server-side state stays live without polling.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigia_proto::OutboundMessage;

use crate::encoder::{EncoderClient, EncoderError};
use crate::models::RemoteCommand;
use crate::signal::SignalOutbound;

/// Action name that requests an aggregated encoder status snapshot
/// instead of a single pass-through call.
pub const STATUS_ACTION: &str = "request_status";

pub struct CommandRelay {
    encoder: Arc<dyn EncoderClient>,
    outbound: Arc<dyn SignalOutbound>,
    cancel: CancellationToken,
}

impl CommandRelay {
    /// Create the relay and start draining encoder notifications.
    pub fn new(encoder: Arc<dyn EncoderClient>, outbound: Arc<dyn SignalOutbound>) -> Self {
        let relay = Self {
            encoder,
            outbound,
            cancel: CancellationToken::new(),
        };
        relay.spawn_notification_drain();
        relay
    }

    fn spawn_notification_drain(&self) {
        let mut events = self.encoder.subscribe();
        let outbound = Arc::clone(&self.outbound);
        let token = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    result = events.recv() => match result {
                        Ok(event) => {
                            let message = OutboundMessage::EncoderEvent {
                                event: event.event,
                                data: event.data,
                                timestamp: Utc::now(),
                            };
                            if let Err(e) = outbound.send(message).await {
                                warn!(error = %e, "Failed to re-emit encoder event upstream");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Encoder notification channel closed, stopping drain");
                            return;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged_events = n, "Encoder notification stream lagged");
                        }
                    }
                }
            }
        });
    }

    /// Forward one command. Completion emits exactly one correlated
    /// result when `correlation_id` is present; fire-and-forget failures
    /// are only logged. A cancelled relay (session teardown) suppresses
    /// any late emission.
    pub fn on_command(&self, command: RemoteCommand) {
        let encoder = Arc::clone(&self.encoder);
        let outbound = Arc::clone(&self.outbound);
        let token = self.cancel.clone();

        tokio::spawn(async move {
            let RemoteCommand { action, params, correlation_id } = command;

            let outcome = tokio::select! {
                () = token.cancelled() => return,
                result = run_command(&*encoder, &action, params) => result,
            };

            if action == STATUS_ACTION {
                if let Ok(status) = &outcome {
                    let message = OutboundMessage::EncoderStatus {
                        status: status.clone(),
                        timestamp: Utc::now(),
                    };
                    send_guarded(&*outbound, &token, message).await;
                }
            }

            let Some(correlation_id) = correlation_id else {
                if let Err(e) = outcome {
                    warn!(%action, error = %e, "Fire-and-forget encoder command failed");
                }
                return;
            };

            let message = match outcome {
                Ok(payload) => OutboundMessage::RemoteCommandResult {
                    correlation_id,
                    success: true,
                    payload: Some(payload),
                    error: None,
                    timestamp: Utc::now(),
                },
                Err(e) => OutboundMessage::RemoteCommandResult {
                    correlation_id,
                    success: false,
                    payload: None,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                },
            };
            send_guarded(&*outbound, &token, message).await;
        });
    }

    /// Stop the notification drain and suppress emissions from any
    /// in-flight command continuations.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CommandRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_guarded(
    outbound: &dyn SignalOutbound,
    token: &CancellationToken,
    message: OutboundMessage,
) {
    tokio::select! {
        () = token.cancelled() => {}
        result = outbound.send(message) => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to send command relay message upstream");
            }
        }
    }
}

async fn run_command(
    encoder: &dyn EncoderClient,
    action: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, EncoderError> {
    if action == STATUS_ACTION {
        gather_status(encoder).await
    } else {
        encoder.call(action, params).await
    }
}

/// Aggregate the encoder's stream/record/scene state in one pass.
/// Individual call failures degrade to `null` fields; only a fully
/// unreachable encoder is an error.
async fn gather_status(encoder: &dyn EncoderClient) -> Result<serde_json::Value, EncoderError> {
    let stream = encoder.call("GetStreamStatus", serde_json::Value::Null).await.ok();
    let record = encoder.call("GetRecordStatus", serde_json::Value::Null).await.ok();
    let scene = encoder.call("GetCurrentProgramScene", serde_json::Value::Null).await.ok();
    let scenes = encoder.call("GetSceneList", serde_json::Value::Null).await.ok();

    if stream.is_none() && record.is_none() && scene.is_none() && scenes.is_none() {
        return Err(EncoderError::NotConnected);
    }

    Ok(json!({
        "stream": stream,
        "record": record,
        "current_scene": scene,
        "scenes": scenes,
    }))
}
