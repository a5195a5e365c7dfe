//! Protocol event definitions and serialization
//!
//! These are the logical events exchanged between a connection and the
//! coordinator. Transport framing is JSON-per-message; anything beyond that
//! is the gateway adapter's concern. Request-style inbound events carry a
//! correlation id echoed on the ack or nack, so duplicate detection and
//! timeout handling live server-side rather than in a client-side timer.

use crate::error::{CoordinatorError, Result};
use crate::types::{Complexity, MatchCriteria, MatchId, QuestionId, RoomId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events received from a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    UserConnected {
        user_id: UserId,
    },
    UserDisconnected {
        user_id: UserId,
    },
    MatchRequest {
        correlation_id: Uuid,
        user_id: UserId,
        complexity: Complexity,
        category: String,
        language: String,
        /// Caller-chosen wait limit in seconds
        timeout_seconds: u64,
    },
    MatchCancelRequest {
        user_id: UserId,
    },
    MatchAcceptRequest {
        user_id: UserId,
        match_id: MatchId,
    },
    MatchDeclineRequest {
        user_id: UserId,
        match_id: MatchId,
        /// True when the client observed the offer window lapse
        is_timeout: bool,
    },
    RematchRequest {
        correlation_id: Uuid,
        user_id: UserId,
        /// The finished pairing this rematch refers back to
        match_id: MatchId,
        partner_id: UserId,
        complexity: Complexity,
        category: String,
        language: String,
    },
    MatchEndRequest {
        user_id: UserId,
        match_id: MatchId,
    },
}

impl InboundEvent {
    /// The user the event claims to act for
    pub fn user_id(&self) -> &UserId {
        match self {
            InboundEvent::UserConnected { user_id }
            | InboundEvent::UserDisconnected { user_id }
            | InboundEvent::MatchRequest { user_id, .. }
            | InboundEvent::MatchCancelRequest { user_id }
            | InboundEvent::MatchAcceptRequest { user_id, .. }
            | InboundEvent::MatchDeclineRequest { user_id, .. }
            | InboundEvent::RematchRequest { user_id, .. }
            | InboundEvent::MatchEndRequest { user_id, .. } => user_id,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            CoordinatorError::InvalidEvent {
                reason: format!("Failed to parse inbound event: {}", e),
            }
            .into()
        })
    }
}

/// Error codes surfaced on nacks, mirroring the coordinator error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DuplicateRequest,
    NotFound,
    NotAuthorized,
    PartnerUnavailable,
    Expired,
    Unreachable,
    Internal,
}

impl From<&CoordinatorError> for ErrorCode {
    fn from(err: &CoordinatorError) -> Self {
        match err {
            CoordinatorError::DuplicateRequest { .. } => ErrorCode::DuplicateRequest,
            CoordinatorError::NotFound { .. } => ErrorCode::NotFound,
            CoordinatorError::NotAuthorized { .. } => ErrorCode::NotAuthorized,
            CoordinatorError::PartnerUnavailable { .. } => ErrorCode::PartnerUnavailable,
            CoordinatorError::Expired { .. } => ErrorCode::Expired,
            CoordinatorError::Unreachable { .. } => ErrorCode::Unreachable,
            CoordinatorError::InvalidEvent { .. }
            | CoordinatorError::ConfigurationError { .. }
            | CoordinatorError::InternalError { .. } => ErrorCode::Internal,
        }
    }
}

/// Events dispatched to connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    /// Ack for MATCH_REQUEST / REMATCH_REQUEST
    MatchRequestAccepted {
        correlation_id: Uuid,
    },
    /// Nack: the user already has an active request or offer
    MatchRequestExists {
        correlation_id: Uuid,
    },
    /// Nack with taxonomy code; covers transient and protocol failures
    MatchRequestError {
        correlation_id: Option<Uuid>,
        code: ErrorCode,
    },
    /// A candidate pairing was created in PENDING state
    MatchFound {
        match_id: MatchId,
        user1: UserId,
        user2: UserId,
    },
    /// Offer CONFIRMED; session created
    MatchSuccessful {
        match_id: MatchId,
        session_id: SessionId,
        room_id: RoomId,
        question_id: QuestionId,
        title: String,
    },
    /// Offer reached a failure terminal (decline, timeout, disconnect)
    MatchUnsuccessful {
        match_id: MatchId,
    },
    /// The waiting request's own timeout elapsed without a pairing
    MatchUnavailable {},
    /// The session partner's connection lapsed past the grace window
    PartnerDisconnected {
        session_id: SessionId,
    },
    /// The session ended (explicit end by either side, or abandonment)
    SessionEnded {
        session_id: SessionId,
    },
}

impl OutboundEvent {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            CoordinatorError::InternalError {
                message: format!("Failed to serialize outbound event: {}", e),
            }
            .into()
        })
    }

    /// The discriminant name, handy for logging and test assertions
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::MatchRequestAccepted { .. } => "MATCH_REQUEST_ACCEPTED",
            OutboundEvent::MatchRequestExists { .. } => "MATCH_REQUEST_EXISTS",
            OutboundEvent::MatchRequestError { .. } => "MATCH_REQUEST_ERROR",
            OutboundEvent::MatchFound { .. } => "MATCH_FOUND",
            OutboundEvent::MatchSuccessful { .. } => "MATCH_SUCCESSFUL",
            OutboundEvent::MatchUnsuccessful { .. } => "MATCH_UNSUCCESSFUL",
            OutboundEvent::MatchUnavailable {} => "MATCH_UNAVAILABLE",
            OutboundEvent::PartnerDisconnected { .. } => "PARTNER_DISCONNECTED",
            OutboundEvent::SessionEnded { .. } => "SESSION_ENDED",
        }
    }
}

/// Build the criteria embedded in a MATCH_REQUEST or REMATCH_REQUEST
pub fn criteria_of(complexity: Complexity, category: &str, language: &str) -> MatchCriteria {
    MatchCriteria {
        complexity,
        category: category.to_string(),
        language: language.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_event_wire_format() {
        let json = r#"{
            "event": "MATCH_REQUEST",
            "data": {
                "correlation_id": "6f2b9e9e-9c1a-4e24-b2bb-0d3b0a3c7f11",
                "user_id": "u1",
                "complexity": "Medium",
                "category": "Arrays",
                "language": "Python",
                "timeout_seconds": 60
            }
        }"#;

        let event = InboundEvent::from_json(json.as_bytes()).unwrap();
        match event {
            InboundEvent::MatchRequest {
                user_id,
                complexity,
                timeout_seconds,
                ..
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(complexity, Complexity::Medium);
                assert_eq!(timeout_seconds, 60);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_inbound_event_rejected() {
        let err = InboundEvent::from_json(b"{\"event\": \"NO_SUCH_EVENT\"}").unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::InvalidEvent { .. }));
    }

    #[test]
    fn test_outbound_event_serialization() {
        let event = OutboundEvent::MatchFound {
            match_id: Uuid::new_v4(),
            user1: "u1".to_string(),
            user2: "u2".to_string(),
        };

        let bytes = event.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "MATCH_FOUND");
        assert_eq!(value["data"]["user1"], "u1");
    }

    #[test]
    fn test_error_code_mapping() {
        let err = CoordinatorError::DuplicateRequest {
            user_id: "u1".to_string(),
        };
        assert_eq!(ErrorCode::from(&err), ErrorCode::DuplicateRequest);

        let err = CoordinatorError::PartnerUnavailable {
            partner_id: "u2".to_string(),
        };
        assert_eq!(ErrorCode::from(&err), ErrorCode::PartnerUnavailable);
    }

    #[test]
    fn test_event_user_id_extraction() {
        let event = InboundEvent::MatchCancelRequest {
            user_id: "u9".to_string(),
        };
        assert_eq!(event.user_id(), "u9");
    }
}
