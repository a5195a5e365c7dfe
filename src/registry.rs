//! Connection registry for liveness bookkeeping
//!
//! Tracks which user identities currently have a live transport connection
//! and how long a dropped connection is tolerated before the user is treated
//! as gone. A user reconnecting before grace expiry re-binds to the existing
//! logical identity; nothing protocol-visible changes.

use crate::types::{ConnectionId, ConnectionRecord, UserId};
use crate::utils::current_timestamp;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// In-memory registry of live and grace-period connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<UserId, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a live connection to a user identity.
    ///
    /// Re-identifying an already-known user (reconnect) replaces the
    /// connection id and clears any pending grace deadline.
    pub fn identify(&mut self, user_id: &str, connection_id: ConnectionId) {
        let now = current_timestamp();
        match self.connections.get_mut(user_id) {
            Some(record) => {
                if record.grace_deadline.is_some() {
                    debug!("User {} reconnected within grace window", user_id);
                }
                record.connection_id = connection_id;
                record.last_seen_at = now;
                record.grace_deadline = None;
            }
            None => {
                self.connections.insert(
                    user_id.to_string(),
                    ConnectionRecord {
                        user_id: user_id.to_string(),
                        connection_id,
                        connected_at: now,
                        last_seen_at: now,
                        grace_deadline: None,
                    },
                );
            }
        }
    }

    /// Start the grace timer for a dropped connection.
    ///
    /// Ignored when the user has already re-identified with a different
    /// connection; the stale disconnect must not clobber the live binding.
    pub fn mark_disconnected(
        &mut self,
        user_id: &str,
        connection_id: ConnectionId,
        grace: Duration,
    ) -> bool {
        let now = current_timestamp();
        match self.connections.get_mut(user_id) {
            Some(record) if record.connection_id == connection_id => {
                record.last_seen_at = now;
                record.grace_deadline = Some(now + grace);
                true
            }
            _ => false,
        }
    }

    /// A user is reachable while connected or still inside the grace window
    pub fn is_reachable(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        match self.connections.get(user_id) {
            Some(record) => match record.grace_deadline {
                Some(deadline) => now < deadline,
                None => true,
            },
            None => false,
        }
    }

    /// Collect and remove users whose grace deadline has passed
    pub fn expired(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let gone: Vec<UserId> = self
            .connections
            .values()
            .filter(|r| matches!(r.grace_deadline, Some(deadline) if now >= deadline))
            .map(|r| r.user_id.clone())
            .collect();

        for user_id in &gone {
            self.connections.remove(user_id);
        }
        gone
    }

    /// Number of users considered reachable right now
    pub fn reachable_count(&self, now: DateTime<Utc>) -> usize {
        self.connections
            .values()
            .filter(|r| match r.grace_deadline {
                Some(deadline) => now < deadline,
                None => true,
            })
            .count()
    }

    #[cfg(test)]
    pub fn set_grace_deadline(&mut self, user_id: &str, deadline: Option<DateTime<Utc>>) {
        if let Some(record) = self.connections.get_mut(user_id) {
            record.grace_deadline = deadline;
        }
    }
}
