//! Offer state machine and the board of active offers
//!
//! Governs the mutual accept/decline/timeout handshake for one candidate
//! pairing. The transition function is commutative over the two parties:
//! either side's accept or decline may arrive first and the terminal outcome
//! is the same. Terminal offers release both users for new enrollment.

use crate::error::{CoordinatorError, Result};
use crate::types::{MatchCriteria, MatchId, MatchOffer, OfferSource, OfferState, UserId};
use crate::utils::{current_timestamp, generate_match_id};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Result of an accept transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// This side accepted; waiting on the partner
    AwaitingPartner,
    /// Both sides have now accepted
    Confirmed,
    /// Repeat accept from the same side; nothing changed
    AlreadyAccepted,
}

impl MatchOffer {
    /// Create a fresh PENDING offer between two users
    pub fn open(
        user_a: UserId,
        user_b: UserId,
        criteria: MatchCriteria,
        source: OfferSource,
        window: Duration,
    ) -> Self {
        let now = current_timestamp();
        Self {
            match_id: generate_match_id(),
            user_a,
            user_b,
            criteria,
            state: OfferState::Pending,
            source,
            created_at: now,
            expires_at: now + window,
        }
    }

    pub fn is_party(&self, user_id: &str) -> bool {
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

    fn ensure_party(&self, user_id: &str) -> Result<()> {
        if self.is_party(user_id) {
            Ok(())
        } else {
            Err(CoordinatorError::NotAuthorized {
                user_id: user_id.to_string(),
                match_id: self.match_id.to_string(),
            }
            .into())
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_terminal() {
            Err(CoordinatorError::Expired {
                entity: format!("match offer {}", self.match_id),
            }
            .into())
        } else {
            Ok(())
        }
    }

    /// Accept by one party.
    ///
    /// A repeat accept from a side that already accepted is a no-op, not an
    /// error. The transition commutes: whichever side accepts second lands
    /// in CONFIRMED.
    pub fn accept(&mut self, user_id: &str) -> Result<AcceptOutcome> {
        self.ensure_party(user_id)?;
        self.ensure_open()?;

        let by_a = self.user_a == user_id;
        match (self.state, by_a) {
            (OfferState::Pending, true) => {
                self.state = OfferState::AcceptedByA;
                Ok(AcceptOutcome::AwaitingPartner)
            }
            (OfferState::Pending, false) => {
                self.state = OfferState::AcceptedByB;
                Ok(AcceptOutcome::AwaitingPartner)
            }
            (OfferState::AcceptedByA, true) | (OfferState::AcceptedByB, false) => {
                Ok(AcceptOutcome::AlreadyAccepted)
            }
            (OfferState::AcceptedByA, false) | (OfferState::AcceptedByB, true) => {
                self.state = OfferState::Confirmed;
                Ok(AcceptOutcome::Confirmed)
            }
            // Terminal states are rejected by ensure_open above
            (state, _) => Err(CoordinatorError::InternalError {
                message: format!("Unexpected accept in state {:?}", state),
            }
            .into()),
        }
    }

    /// Decline by one party; `is_timeout` tags a client-observed offer-window
    /// expiry, mapping to TIMED_OUT instead of DECLINED.
    pub fn decline(&mut self, user_id: &str, is_timeout: bool) -> Result<()> {
        self.ensure_party(user_id)?;
        self.ensure_open()?;

        self.state = if is_timeout {
            OfferState::TimedOut
        } else {
            OfferState::Declined
        };
        Ok(())
    }

    /// Explicit cancel; only allowed before any acceptance
    pub fn cancel(&mut self, user_id: &str) -> Result<()> {
        self.ensure_party(user_id)?;
        self.ensure_open()?;

        if self.state != OfferState::Pending {
            return Err(CoordinatorError::InvalidEvent {
                reason: format!(
                    "Cannot cancel offer {} after a party accepted",
                    self.match_id
                ),
            }
            .into());
        }
        self.state = OfferState::Cancelled;
        Ok(())
    }

    /// Server-side offer-window expiry
    pub fn expire(&mut self) {
        if !self.state.is_terminal() {
            self.state = OfferState::TimedOut;
        }
    }

    /// A participant's grace window lapsed; treated as a timeout failure
    pub fn fail_unreachable(&mut self) {
        if !self.state.is_terminal() {
            self.state = OfferState::TimedOut;
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && now >= self.expires_at
    }
}

/// Board of active offers with the per-user single-enrollment index
#[derive(Debug, Default)]
pub struct OfferBoard {
    offers: HashMap<MatchId, MatchOffer>,
    by_user: HashMap<UserId, MatchId>,
}

impl OfferBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new offer; both users must currently be unenrolled
    pub fn insert(&mut self, offer: MatchOffer) -> Result<()> {
        for user in [&offer.user_a, &offer.user_b] {
            if self.by_user.contains_key(user.as_str()) {
                return Err(CoordinatorError::DuplicateRequest {
                    user_id: user.clone(),
                }
                .into());
            }
        }
        self.by_user.insert(offer.user_a.clone(), offer.match_id);
        self.by_user.insert(offer.user_b.clone(), offer.match_id);
        self.offers.insert(offer.match_id, offer);
        Ok(())
    }

    pub fn get(&self, match_id: &MatchId) -> Option<&MatchOffer> {
        self.offers.get(match_id)
    }

    pub fn get_mut(&mut self, match_id: &MatchId) -> Result<&mut MatchOffer> {
        self.offers
            .get_mut(match_id)
            .ok_or_else(|| {
                CoordinatorError::NotFound {
                    entity: format!("match offer {}", match_id),
                }
                .into()
            })
    }

    pub fn offer_for_user(&self, user_id: &str) -> Option<&MatchOffer> {
        self.by_user
            .get(user_id)
            .and_then(|match_id| self.offers.get(match_id))
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.offers.len()
    }

    /// Remove a terminal offer, releasing both users for new enrollment
    pub fn remove_terminal(&mut self, match_id: &MatchId) -> Option<MatchOffer> {
        let terminal = self
            .offers
            .get(match_id)
            .map(|offer| offer.state.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return None;
        }

        let offer = self.offers.remove(match_id)?;
        self.by_user.remove(&offer.user_a);
        self.by_user.remove(&offer.user_b);
        Some(offer)
    }

    /// Match ids whose offer window has elapsed
    pub fn due(&self, now: DateTime<Utc>) -> Vec<MatchId> {
        self.offers
            .values()
            .filter(|offer| offer.is_due(now))
            .map(|offer| offer.match_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Complexity;
    use proptest::prelude::*;

    fn criteria() -> MatchCriteria {
        MatchCriteria {
            complexity: Complexity::Medium,
            category: "Arrays".to_string(),
            language: "Python".to_string(),
        }
    }

    fn offer() -> MatchOffer {
        MatchOffer::open(
            "a".to_string(),
            "b".to_string(),
            criteria(),
            OfferSource::NewMatch,
            Duration::seconds(30),
        )
    }

    #[test]
    fn test_accept_both_orders_confirm() {
        let mut o1 = offer();
        assert_eq!(o1.accept("a").unwrap(), AcceptOutcome::AwaitingPartner);
        assert_eq!(o1.state, OfferState::AcceptedByA);
        assert_eq!(o1.accept("b").unwrap(), AcceptOutcome::Confirmed);
        assert_eq!(o1.state, OfferState::Confirmed);

        let mut o2 = offer();
        assert_eq!(o2.accept("b").unwrap(), AcceptOutcome::AwaitingPartner);
        assert_eq!(o2.state, OfferState::AcceptedByB);
        assert_eq!(o2.accept("a").unwrap(), AcceptOutcome::Confirmed);
        assert_eq!(o2.state, OfferState::Confirmed);
    }

    #[test]
    fn test_repeat_accept_is_noop() {
        let mut o = offer();
        o.accept("a").unwrap();
        assert_eq!(o.accept("a").unwrap(), AcceptOutcome::AlreadyAccepted);
        assert_eq!(o.state, OfferState::AcceptedByA);
    }

    #[test]
    fn test_decline_from_any_state_terminates() {
        let mut o = offer();
        o.decline("b", false).unwrap();
        assert_eq!(o.state, OfferState::Declined);

        let mut o = offer();
        o.accept("a").unwrap();
        o.decline("b", false).unwrap();
        assert_eq!(o.state, OfferState::Declined);
    }

    #[test]
    fn test_timeout_tagged_decline() {
        let mut o = offer();
        o.decline("a", true).unwrap();
        assert_eq!(o.state, OfferState::TimedOut);
    }

    #[test]
    fn test_cancel_only_before_acceptance() {
        let mut o = offer();
        o.cancel("a").unwrap();
        assert_eq!(o.state, OfferState::Cancelled);

        let mut o = offer();
        o.accept("b").unwrap();
        assert!(o.cancel("a").is_err());
        assert_eq!(o.state, OfferState::AcceptedByB);
    }

    #[test]
    fn test_non_party_rejected() {
        let mut o = offer();
        let err = o.accept("stranger").unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::NotAuthorized { .. }));

        let err = o.decline("stranger", false).unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::NotAuthorized { .. }));
    }

    #[test]
    fn test_terminal_offer_rejects_actions() {
        let mut o = offer();
        o.decline("a", false).unwrap();

        let err = o.accept("b").unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::Expired { .. }));
    }

    #[test]
    fn test_expire_and_unreachable_map_to_timed_out() {
        let mut o = offer();
        o.expire();
        assert_eq!(o.state, OfferState::TimedOut);

        let mut o = offer();
        o.accept("a").unwrap();
        o.fail_unreachable();
        assert_eq!(o.state, OfferState::TimedOut);

        // Terminal states are not overwritten
        let mut o = offer();
        o.accept("a").unwrap();
        o.accept("b").unwrap();
        o.expire();
        assert_eq!(o.state, OfferState::Confirmed);
    }

    #[test]
    fn test_board_single_enrollment() {
        let mut board = OfferBoard::new();
        board.insert(offer()).unwrap();

        let second = MatchOffer::open(
            "a".to_string(),
            "c".to_string(),
            criteria(),
            OfferSource::NewMatch,
            Duration::seconds(30),
        );
        let err = board.insert(second).unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::DuplicateRequest { .. }));
    }

    #[test]
    fn test_board_remove_terminal_releases_users() {
        let mut board = OfferBoard::new();
        let o = offer();
        let match_id = o.match_id;
        board.insert(o).unwrap();

        // Non-terminal offers stay put
        assert!(board.remove_terminal(&match_id).is_none());
        assert!(board.has_user("a"));

        board.get_mut(&match_id).unwrap().decline("a", false).unwrap();
        let removed = board.remove_terminal(&match_id).unwrap();
        assert_eq!(removed.state, OfferState::Declined);
        assert!(!board.has_user("a"));
        assert!(!board.has_user("b"));
        assert_eq!(board.active_count(), 0);
    }

    #[test]
    fn test_board_due_collection() {
        let mut board = OfferBoard::new();
        let mut o = offer();
        o.expires_at = current_timestamp() - Duration::seconds(1);
        let match_id = o.match_id;
        board.insert(o).unwrap();

        let due = board.due(current_timestamp());
        assert_eq!(due, vec![match_id]);
    }

    /// One action by one party, used to drive random interleavings
    #[derive(Debug, Clone, Copy)]
    enum Action {
        AcceptA,
        AcceptB,
        DeclineA,
        DeclineB,
    }

    fn action_strategy() -> impl Strategy<Value = Action> {
        prop_oneof![
            Just(Action::AcceptA),
            Just(Action::AcceptB),
            Just(Action::DeclineA),
            Just(Action::DeclineB),
        ]
    }

    proptest! {
        /// Any interleaving containing a decline ends DECLINED; an
        /// interleaving of accepts only ends CONFIRMED once both accepted.
        /// The order of arrival never changes the terminal outcome.
        #[test]
        fn prop_outcome_independent_of_interleaving(
            actions in proptest::collection::vec(action_strategy(), 1..8)
        ) {
            let mut o = offer();
            let mut saw_decline = false;
            let mut accepted_a = false;
            let mut accepted_b = false;

            for action in &actions {
                if o.state.is_terminal() {
                    break;
                }
                match action {
                    Action::AcceptA => {
                        o.accept("a").unwrap();
                        accepted_a = true;
                    }
                    Action::AcceptB => {
                        o.accept("b").unwrap();
                        accepted_b = true;
                    }
                    Action::DeclineA => {
                        o.decline("a", false).unwrap();
                        saw_decline = true;
                    }
                    Action::DeclineB => {
                        o.decline("b", false).unwrap();
                        saw_decline = true;
                    }
                }
            }

            if saw_decline {
                prop_assert_eq!(o.state, OfferState::Declined);
            } else if accepted_a && accepted_b {
                prop_assert_eq!(o.state, OfferState::Confirmed);
            } else {
                prop_assert!(!o.state.is_terminal());
            }
        }
    }
}
