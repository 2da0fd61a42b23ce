//! Signaling relay transport
//!
//! The relay is a dumb forwarder: it stamps each envelope with the
//! sender's transport identity and delivers it to the peer named in
//! `to`. The [`SignalingRelay`] trait keeps the orchestration layer
//! independent of the transport so tests can use an in-memory relay.

use super::protocol::{SignalEnvelope, SignalMessage, BROADCAST_TARGET};
use crate::{Error, Result};
use copresence_core::PeerId;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound half of the signaling relay.
///
/// `send` must not block the polling tick; implementations queue the
/// message and deliver it from a background task.
pub trait SignalingRelay: Send + Sync {
    /// Send a message to one peer
    fn send(&self, to: &str, message: SignalMessage) -> Result<()>;

    /// Send a message to every connected peer
    fn broadcast(&self, message: SignalMessage) -> Result<()> {
        self.send(BROADCAST_TARGET, message)
    }
}

/// WebSocket signaling relay client
pub struct WsRelay {
    /// Local transport-level peer id stamped into outgoing envelopes
    local_peer_id: PeerId,

    /// Outgoing frame sender
    tx: mpsc::UnboundedSender<Message>,
}

impl WsRelay {
    /// Connect to the relay server.
    ///
    /// Establishes the WebSocket connection, spawns the sender and
    /// receiver tasks, and returns the relay handle plus the stream of
    /// incoming envelopes addressed to this peer.
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket relay URL (ws:// or wss://)
    /// * `local_peer_id` - our transport-level identity
    pub async fn connect(
        url: &str,
        local_peer_id: PeerId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalEnvelope>)> {
        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling relay");

        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, local_peer_id.clone(), envelope_tx));

        Ok((Self { local_peer_id, tx }, envelope_rx))
    }

    /// Sender task: drains the outbox channel into the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket frame: {}", e);
                break;
            }
        }

        debug!("Relay sender task terminated");
    }

    /// Receiver task: parses incoming frames and forwards envelopes
    /// addressed to this peer.
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        local_peer_id: PeerId,
        envelope_tx: mpsc::UnboundedSender<SignalEnvelope>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match SignalEnvelope::from_json(&text) {
                    Ok(envelope) => {
                        if envelope.to != local_peer_id && envelope.to != BROADCAST_TARGET {
                            // Misrouted frame; the relay forwards by
                            // target id so this indicates a relay bug.
                            warn!(
                                "Dropping envelope addressed to {} (we are {})",
                                envelope.to, local_peer_id
                            );
                            continue;
                        }

                        if envelope_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Malformed message: drop it and rely on the
                        // next tick's reconciliation to retry.
                        warn!("Dropping malformed signaling frame: {}", e);
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("Relay WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Relay receiver task terminated");
    }
}

impl SignalingRelay for WsRelay {
    fn send(&self, to: &str, message: SignalMessage) -> Result<()> {
        let envelope = SignalEnvelope {
            from: self.local_peer_id.clone(),
            to: to.to_string(),
            message,
        };

        let json = envelope.to_json()?;
        debug!("Sending signaling envelope: {}", json);

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::SignalingError(format!("Relay outbox closed: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::ConnectionType;
    use std::sync::Mutex;

    /// In-memory relay capturing sent envelopes
    struct CapturingRelay {
        local: PeerId,
        sent: Mutex<Vec<SignalEnvelope>>,
    }

    impl SignalingRelay for CapturingRelay {
        fn send(&self, to: &str, message: SignalMessage) -> Result<()> {
            self.sent.lock().unwrap().push(SignalEnvelope {
                from: self.local.clone(),
                to: to.to_string(),
                message,
            });
            Ok(())
        }
    }

    #[test]
    fn test_broadcast_uses_wildcard_target() {
        let relay = CapturingRelay {
            local: "peer-a".to_string(),
            sent: Mutex::new(Vec::new()),
        };

        relay
            .broadcast(SignalMessage::EnableVideo {
                connection_type: ConnectionType::Audio,
            })
            .unwrap();

        let sent = relay.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, BROADCAST_TARGET);
        assert_eq!(sent[0].from, "peer-a");
    }
}
