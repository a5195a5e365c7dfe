//! Event gateway: the transport-facing fan-out layer
//!
//! All other components emit abstract outbound events through the
//! [`EventGateway`] trait; only the adapter in [`ws`] knows about sockets.

pub mod events;
pub mod ws;

use crate::error::Result;
use crate::types::UserId;
use async_trait::async_trait;
use events::OutboundEvent;

/// Trait for dispatching outbound events to connected users
///
/// Sending to an unreachable user is not an error; the event is dropped and
/// the caller's state transition stands. Only reachable parties are notified.
#[async_trait]
pub trait EventGateway: Send + Sync {
    /// Dispatch one event to one user
    async fn send(&self, user_id: &UserId, event: OutboundEvent) -> Result<()>;

    /// Dispatch the same event to both members of a pair
    async fn send_pair(&self, a: &UserId, b: &UserId, event: OutboundEvent) -> Result<()> {
        self.send(a, event.clone()).await?;
        self.send(b, event).await
    }
}

/// Recording gateway for tests
#[derive(Debug, Default)]
pub struct MockEventGateway {
    sent: std::sync::Mutex<Vec<(UserId, OutboundEvent)>>,
}

impl MockEventGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events sent to a given user, in order
    pub fn events_for(&self, user_id: &str) -> Vec<OutboundEvent> {
        self.sent
            .lock()
            .map(|sent| {
                sent.iter()
                    .filter(|(u, _)| u == user_id)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count of events with the given discriminant name, across all users
    pub fn count_events_of_type(&self, name: &str) -> usize {
        self.sent
            .lock()
            .map(|sent| sent.iter().filter(|(_, e)| e.name() == name).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl EventGateway for MockEventGateway {
    async fn send(&self, user_id: &UserId, event: OutboundEvent) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((user_id.clone(), event));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_records_per_user() {
        let gateway = MockEventGateway::new();
        gateway
            .send(&"u1".to_string(), OutboundEvent::MatchUnavailable {})
            .await
            .unwrap();
        gateway
            .send_pair(
                &"u1".to_string(),
                &"u2".to_string(),
                OutboundEvent::MatchUnsuccessful {
                    match_id: uuid::Uuid::new_v4(),
                },
            )
            .await
            .unwrap();

        assert_eq!(gateway.events_for("u1").len(), 2);
        assert_eq!(gateway.events_for("u2").len(), 1);
        assert_eq!(gateway.count_events_of_type("MATCH_UNSUCCESSFUL"), 2);
    }
}
