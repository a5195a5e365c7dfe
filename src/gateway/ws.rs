//! WebSocket adapter: binds live sockets to users and pumps events
//!
//! Each accepted socket gets a fresh connection id. The first
//! `USER_CONNECTED` frame binds the socket to a user; until then no other
//! frame is forwarded, and a bound socket can neither speak for another user
//! nor re-identify as one. Outbound events for the bound user are routed to
//! the socket's channel. When the socket
//! closes, the coordinator is told so the grace window starts. A reconnect
//! replaces the registered sender, and the old socket's teardown is ignored
//! because its connection id no longer matches.

use crate::coordinator::MatchCoordinator;
use crate::error::Result;
use crate::gateway::events::{InboundEvent, OutboundEvent};
use crate::gateway::EventGateway;
use crate::types::{ConnectionId, UserId};
use crate::utils::generate_connection_id;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Routes outbound events to the live socket of each bound user
#[derive(Default)]
pub struct WsGateway {
    senders: RwLock<HashMap<UserId, (ConnectionId, mpsc::UnboundedSender<OutboundEvent>)>>,
}

impl WsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a user to a socket's outbound channel, replacing any prior socket
    pub fn register(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        sender: mpsc::UnboundedSender<OutboundEvent>,
    ) {
        if let Ok(mut senders) = self.senders.write() {
            senders.insert(user_id.to_string(), (connection_id, sender));
        }
    }

    /// Drop the binding, but only if it still belongs to this connection
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) {
        if let Ok(mut senders) = self.senders.write() {
            if senders
                .get(user_id)
                .map(|(bound, _)| *bound == connection_id)
                .unwrap_or(false)
            {
                senders.remove(user_id);
            }
        }
    }

    pub fn connected_count(&self) -> usize {
        self.senders.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventGateway for WsGateway {
    async fn send(&self, user_id: &UserId, event: OutboundEvent) -> Result<()> {
        let sender = self
            .senders
            .read()
            .ok()
            .and_then(|senders| senders.get(user_id).map(|(_, tx)| tx.clone()));
        match sender {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("Socket channel for user {} closed; event dropped", user_id);
                }
            }
            None => {
                debug!("No socket bound for user {}; event dropped", user_id);
            }
        }
        Ok(())
    }
}

/// What a socket's identity binding allows for an inbound frame
#[derive(Debug, PartialEq, Eq)]
enum FrameDisposition {
    /// Identification frame; bind (or re-bind) the socket to its user
    Bind,
    /// Forward to the coordinator under the existing binding
    Forward,
    /// Drop the frame without forwarding
    Reject(&'static str),
}

/// A socket may not act for anyone until it identifies, and once bound it
/// speaks only for that user. Re-identifying as someone else would hijack
/// the named user's outbound channel, so it is refused outright.
fn admit(bound: Option<&UserId>, event: &InboundEvent) -> FrameDisposition {
    match (bound, event) {
        (None, InboundEvent::UserConnected { .. }) => FrameDisposition::Bind,
        (None, _) => FrameDisposition::Reject("socket has not identified itself"),
        (Some(bound), InboundEvent::UserConnected { user_id }) if user_id == bound => {
            FrameDisposition::Bind
        }
        (Some(_), InboundEvent::UserConnected { .. }) => {
            FrameDisposition::Reject("socket is already bound to another user")
        }
        (Some(bound), event) if event.user_id() == bound => FrameDisposition::Forward,
        (Some(_), _) => FrameDisposition::Reject("event names another user"),
    }
}

/// Drive one accepted WebSocket until it closes
pub async fn handle_socket(
    socket: WebSocket,
    gateway: Arc<WsGateway>,
    coordinator: Arc<MatchCoordinator>,
) {
    let connection_id = generate_connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();
    debug!("Socket accepted ({})", connection_id);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let payload = match event.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to serialize {}: {}", event.name(), e);
                    continue;
                }
            };
            match String::from_utf8(payload) {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Outbound payload not UTF-8: {}", e),
            }
        }
    });

    let mut bound_user: Option<UserId> = None;

    while let Some(Ok(message)) = ws_rx.next().await {
        let bytes = match message {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(bytes) => bytes.to_vec(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let event = match InboundEvent::from_json(&bytes) {
            Ok(event) => event,
            Err(e) => {
                warn!("Malformed frame on connection {}: {}", connection_id, e);
                continue;
            }
        };

        match admit(bound_user.as_ref(), &event) {
            FrameDisposition::Bind => {
                if let InboundEvent::UserConnected { user_id } = &event {
                    gateway.register(user_id, connection_id, tx.clone());
                    bound_user = Some(user_id.clone());
                }
            }
            FrameDisposition::Forward => {}
            FrameDisposition::Reject(reason) => {
                warn!(
                    "Connection {} frame for {} rejected: {}",
                    connection_id,
                    event.user_id(),
                    reason
                );
                continue;
            }
        }

        if let Err(e) = coordinator.handle_inbound(event, connection_id).await {
            warn!("Event handling failed on connection {}: {}", connection_id, e);
        }
    }

    if let Some(user_id) = bound_user {
        info!("Socket for user {} closed ({})", user_id, connection_id);
        gateway.unregister(&user_id, connection_id);
        if let Err(e) = coordinator.handle_user_disconnected(&user_id, connection_id) {
            warn!("Disconnect handling failed for user {}: {}", user_id, e);
        }
    } else {
        debug!("Unbound socket closed ({})", connection_id);
    }
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::OutboundEvent;
    use crate::utils::generate_match_id;

    fn accept_as(user: &str) -> InboundEvent {
        InboundEvent::MatchAcceptRequest {
            user_id: user.to_string(),
            match_id: generate_match_id(),
        }
    }

    fn identify_as(user: &str) -> InboundEvent {
        InboundEvent::UserConnected {
            user_id: user.to_string(),
        }
    }

    #[test]
    fn test_unidentified_socket_may_only_identify() {
        assert!(matches!(
            admit(None, &accept_as("victim")),
            FrameDisposition::Reject(_)
        ));
        assert!(matches!(
            admit(None, &InboundEvent::MatchEndRequest {
                user_id: "victim".to_string(),
                match_id: generate_match_id(),
            }),
            FrameDisposition::Reject(_)
        ));
        assert_eq!(admit(None, &identify_as("u1")), FrameDisposition::Bind);
    }

    #[test]
    fn test_bound_socket_speaks_only_for_its_user() {
        let bound = "u1".to_string();
        assert_eq!(admit(Some(&bound), &accept_as("u1")), FrameDisposition::Forward);
        assert!(matches!(
            admit(Some(&bound), &accept_as("u2")),
            FrameDisposition::Reject(_)
        ));
    }

    #[test]
    fn test_rebinding_to_another_user_refused() {
        let bound = "u1".to_string();
        // Re-identifying as yourself is a plain reconnect
        assert_eq!(admit(Some(&bound), &identify_as("u1")), FrameDisposition::Bind);
        assert!(matches!(
            admit(Some(&bound), &identify_as("u2")),
            FrameDisposition::Reject(_)
        ));
    }

    #[tokio::test]
    async fn test_send_routes_to_registered_user() {
        let gateway = WsGateway::new();
        let conn = generate_connection_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("u1", conn, tx);

        gateway
            .send(&"u1".to_string(), OutboundEvent::MatchUnavailable {})
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(OutboundEvent::MatchUnavailable {}));
    }

    #[tokio::test]
    async fn test_send_to_unbound_user_is_dropped() {
        let gateway = WsGateway::new();
        gateway
            .send(&"ghost".to_string(), OutboundEvent::MatchUnavailable {})
            .await
            .unwrap();
        assert_eq!(gateway.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_new_binding() {
        let gateway = WsGateway::new();
        let old_conn = generate_connection_id();
        let new_conn = generate_connection_id();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        gateway.register("u1", old_conn, old_tx);
        gateway.register("u1", new_conn, new_tx);
        gateway.unregister("u1", old_conn);

        gateway
            .send(&"u1".to_string(), OutboundEvent::MatchUnavailable {})
            .await
            .unwrap();
        assert_eq!(new_rx.recv().await, Some(OutboundEvent::MatchUnavailable {}));
    }
}
