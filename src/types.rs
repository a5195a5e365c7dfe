//! Common types used throughout the matchmaking coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users (supplied by the external identity layer)
pub type UserId = String;

/// Unique identifier for match offers
pub type MatchId = Uuid;

/// Unique identifier for collaboration sessions
pub type SessionId = Uuid;

/// Unique identifier for rooms (shared by chat and document channels)
pub type RoomId = Uuid;

/// Unique identifier for transport connections
pub type ConnectionId = Uuid;

/// Unique identifier for questions (owned by the question service)
pub type QuestionId = String;

/// Question difficulty requested by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Complexity {
    Easy,
    Medium,
    Hard,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Easy => write!(f, "Easy"),
            Complexity::Medium => write!(f, "Medium"),
            Complexity::Hard => write!(f, "Hard"),
        }
    }
}

/// Matching criteria for a request; also the waiting-pool bucket key.
///
/// Matching is criteria-exact: all three fields must match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchCriteria {
    pub complexity: Complexity,
    pub category: String,
    pub language: String,
}

/// A user's declared intent to be paired
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub user_id: UserId,
    pub criteria: MatchCriteria,
    pub requested_at: DateTime<Utc>,
    /// Caller-supplied deadline; on expiry the request is dropped and the
    /// caller is notified, never retried automatically.
    pub expires_at: DateTime<Utc>,
}

/// State of a match offer's mutual accept/decline handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferState {
    /// Neither party has responded yet
    Pending,
    /// First party accepted, waiting on the second
    AcceptedByA,
    /// Second party accepted, waiting on the first
    AcceptedByB,
    /// Both parties accepted (terminal, success)
    Confirmed,
    /// Either party declined (terminal)
    Declined,
    /// Offer window elapsed or a party disconnected (terminal)
    TimedOut,
    /// Cancelled before any acceptance (terminal)
    Cancelled,
}

impl OfferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OfferState::Confirmed
                | OfferState::Declined
                | OfferState::TimedOut
                | OfferState::Cancelled
        )
    }
}

/// How a match offer came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferSource {
    /// Paired out of the waiting pool
    NewMatch,
    /// Requested directly between two previously paired users
    Rematch,
}

/// A candidate pairing pending mutual accept/decline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOffer {
    pub match_id: MatchId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub criteria: MatchCriteria,
    pub state: OfferState,
    pub source: OfferSource,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Reference to a selected question, handed back by the question service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRef {
    pub id: QuestionId,
    pub title: String,
}

/// Lifecycle status of a collaboration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Ended,
}

/// The live paired state following a confirmed offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub session_id: SessionId,
    pub match_id: MatchId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub question: QuestionRef,
    /// One room, reused for both the chat and shared-document channels
    pub room_id: RoomId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CollaborationSession {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    pub fn partner_of(&self, user_id: &str) -> Option<&UserId> {
        if self.user_a == user_id {
            Some(&self.user_b)
        } else if self.user_b == user_id {
            Some(&self.user_a)
        } else {
            None
        }
    }
}

/// Bookkeeping for one user's live (or recently dropped) connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Set while disconnected; the user counts as reachable until it passes
    pub grace_deadline: Option<DateTime<Utc>>,
}
