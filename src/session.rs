//! Collaboration session lifecycle management
//!
//! A session is created only from a CONFIRMED offer and owns one room id,
//! reused for both the chat and shared-document channels. The coordinator
//! never interprets room content, only membership. Ended sessions are kept
//! briefly so a repeated end request stays an observable no-op.

use crate::error::{CoordinatorError, Result};
use crate::types::{
    CollaborationSession, MatchId, MatchOffer, QuestionRef, SessionId, SessionStatus, UserId,
};
use crate::utils::{current_timestamp, generate_room_id, generate_session_id};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Outcome of an end-session call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    /// Session transitioned to ENDED; the named partner should be notified
    Ended { partner: UserId },
    /// Session was already ended; nothing to do
    AlreadyEnded,
}

/// Board of collaboration sessions
#[derive(Debug, Default)]
pub struct SessionBoard {
    sessions: HashMap<SessionId, CollaborationSession>,
    by_match: HashMap<MatchId, SessionId>,
    by_user: HashMap<UserId, SessionId>,
}

impl SessionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an ACTIVE session from a confirmed offer and a selected question
    pub fn create(&mut self, offer: &MatchOffer, question: QuestionRef) -> Result<&CollaborationSession> {
        for user in [&offer.user_a, &offer.user_b] {
            if let Some(session_id) = self.by_user.get(user.as_str()) {
                if self
                    .sessions
                    .get(session_id)
                    .map(|s| s.status == SessionStatus::Active)
                    .unwrap_or(false)
                {
                    return Err(CoordinatorError::DuplicateRequest {
                        user_id: user.clone(),
                    }
                    .into());
                }
            }
        }

        let session = CollaborationSession {
            session_id: generate_session_id(),
            match_id: offer.match_id,
            user_a: offer.user_a.clone(),
            user_b: offer.user_b.clone(),
            question,
            room_id: generate_room_id(),
            status: SessionStatus::Active,
            created_at: current_timestamp(),
            ended_at: None,
        };

        let session_id = session.session_id;
        self.by_match.insert(session.match_id, session_id);
        self.by_user.insert(session.user_a.clone(), session_id);
        self.by_user.insert(session.user_b.clone(), session_id);
        self.sessions.insert(session_id, session);

        self.sessions.get(&session_id).ok_or_else(|| {
            CoordinatorError::InternalError {
                message: format!("Session {} missing after insert", session_id),
            }
            .into()
        })
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&CollaborationSession> {
        self.sessions.get(session_id)
    }

    pub fn by_match_id(&self, match_id: &MatchId) -> Option<&CollaborationSession> {
        self.by_match
            .get(match_id)
            .and_then(|session_id| self.sessions.get(session_id))
    }

    /// The user's session, if they are an unresolved party in an ACTIVE one
    pub fn active_for_user(&self, user_id: &str) -> Option<&CollaborationSession> {
        self.by_user
            .get(user_id)
            .and_then(|session_id| self.sessions.get(session_id))
            .filter(|session| session.status == SessionStatus::Active)
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .count()
    }

    /// End a session on behalf of a participant; idempotent if already ended
    pub fn end(&mut self, session_id: &SessionId, requester_id: &str) -> Result<EndOutcome> {
        let session = self.sessions.get_mut(session_id).ok_or_else(|| {
            anyhow::Error::from(CoordinatorError::NotFound {
                entity: format!("session {}", session_id),
            })
        })?;

        if !session.is_participant(requester_id) {
            return Err(CoordinatorError::NotAuthorized {
                user_id: requester_id.to_string(),
                match_id: session.match_id.to_string(),
            }
            .into());
        }

        if session.status == SessionStatus::Ended {
            return Ok(EndOutcome::AlreadyEnded);
        }

        session.status = SessionStatus::Ended;
        session.ended_at = Some(current_timestamp());
        let partner = session
            .partner_of(requester_id)
            .cloned()
            .unwrap_or_default();

        self.release_participants(*session_id);
        Ok(EndOutcome::Ended { partner })
    }

    /// Forcibly end a session whose participants are both gone
    pub fn end_abandoned(&mut self, session_id: &SessionId) -> Option<&CollaborationSession> {
        let session = self.sessions.get_mut(session_id)?;
        if session.status == SessionStatus::Ended {
            return None;
        }
        session.status = SessionStatus::Ended;
        session.ended_at = Some(current_timestamp());
        self.release_participants(*session_id);
        self.sessions.get(session_id)
    }

    /// Drop ended sessions older than the retention window
    pub fn prune_ended(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let stale: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                s.status == SessionStatus::Ended
                    && s.ended_at.map(|t| now - t > retention).unwrap_or(false)
            })
            .map(|s| s.session_id)
            .collect();

        for session_id in &stale {
            if let Some(session) = self.sessions.remove(session_id) {
                self.by_match.remove(&session.match_id);
            }
        }
        stale.len()
    }

    /// Clear the per-user index once a session stops being their active one
    fn release_participants(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get(&session_id) {
            let (a, b) = (session.user_a.clone(), session.user_b.clone());
            for user in [a, b] {
                if self.by_user.get(&user) == Some(&session_id) {
                    self.by_user.remove(&user);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Complexity, MatchCriteria, OfferSource, OfferState};

    fn confirmed_offer(a: &str, b: &str) -> MatchOffer {
        let mut offer = MatchOffer::open(
            a.to_string(),
            b.to_string(),
            MatchCriteria {
                complexity: Complexity::Medium,
                category: "Arrays".to_string(),
                language: "Python".to_string(),
            },
            OfferSource::NewMatch,
            Duration::seconds(30),
        );
        offer.state = OfferState::Confirmed;
        offer
    }

    fn question() -> QuestionRef {
        QuestionRef {
            id: "q-two-sum".to_string(),
            title: "Two Sum".to_string(),
        }
    }

    #[test]
    fn test_create_session_from_confirmed_offer() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session = board.create(&offer, question()).unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.match_id, offer.match_id);
        assert!(session.is_participant("u1"));
        assert!(session.is_participant("u2"));
        assert_eq!(board.active_count(), 1);
        assert!(board.active_for_user("u1").is_some());
    }

    #[test]
    fn test_create_rejects_already_enrolled_user() {
        let mut board = SessionBoard::new();
        board.create(&confirmed_offer("u1", "u2"), question()).unwrap();

        let err = board
            .create(&confirmed_offer("u1", "u3"), question())
            .unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::DuplicateRequest { .. }));
    }

    #[test]
    fn test_end_notifies_partner_and_releases_users() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session_id = board.create(&offer, question()).unwrap().session_id;

        let outcome = board.end(&session_id, "u1").unwrap();
        assert_eq!(
            outcome,
            EndOutcome::Ended {
                partner: "u2".to_string()
            }
        );
        assert_eq!(board.active_count(), 0);
        assert!(board.active_for_user("u1").is_none());
        assert!(board.active_for_user("u2").is_none());
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session_id = board.create(&offer, question()).unwrap().session_id;

        board.end(&session_id, "u1").unwrap();
        let outcome = board.end(&session_id, "u2").unwrap();
        assert_eq!(outcome, EndOutcome::AlreadyEnded);
    }

    #[test]
    fn test_end_by_non_participant_rejected() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session_id = board.create(&offer, question()).unwrap().session_id;

        let err = board.end(&session_id, "intruder").unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::NotAuthorized { .. }));
    }

    #[test]
    fn test_end_abandoned() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session_id = board.create(&offer, question()).unwrap().session_id;

        let ended = board.end_abandoned(&session_id).unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        // Second call is a no-op
        assert!(board.end_abandoned(&session_id).is_none());
    }

    #[test]
    fn test_prune_ended_respects_retention() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session_id = board.create(&offer, question()).unwrap().session_id;
        board.end(&session_id, "u1").unwrap();

        let now = current_timestamp();
        assert_eq!(board.prune_ended(now, Duration::seconds(300)), 0);
        assert_eq!(
            board.prune_ended(now + Duration::seconds(301), Duration::seconds(300)),
            1
        );
        assert!(board.get(&session_id).is_none());
    }

    #[test]
    fn test_users_can_start_new_session_after_end() {
        let mut board = SessionBoard::new();
        let offer = confirmed_offer("u1", "u2");
        let session_id = board.create(&offer, question()).unwrap().session_id;
        board.end(&session_id, "u1").unwrap();

        // Same pair again, fresh offer
        let session = board.create(&confirmed_offer("u1", "u2"), question()).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
    }
}
