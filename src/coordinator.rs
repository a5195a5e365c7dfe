//! The matchmaking and paired-session coordinator
//!
//! This is the orchestrator: every inbound protocol event lands here, shared
//! state is mutated under one lock so pairing, handshake and teardown
//! transitions are atomic against concurrent cancels and disconnects, and the
//! resulting outbound events are fanned out through the gateway after the
//! lock is released. Timeouts (request expiry, offer window, reconnection
//! grace) are driven by a periodic sweep rather than blocking waits.

use crate::config::MatchmakingSettings;
use crate::error::{CoordinatorError, Result};
use crate::gateway::events::{criteria_of, ErrorCode, InboundEvent, OutboundEvent};
use crate::gateway::EventGateway;
use crate::metrics::MetricsCollector;
use crate::offer::{AcceptOutcome, OfferBoard};
use crate::pool::{SubmitOutcome, WaitingPool};
use crate::question::QuestionSelector;
use crate::registry::ConnectionRegistry;
use crate::session::{EndOutcome, SessionBoard};
use crate::types::{
    ConnectionId, MatchCriteria, MatchId, MatchOffer, MatchRequest, OfferSource, OfferState,
    QuestionRef, UserId,
};
use crate::utils::current_timestamp;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Statistics about coordinator operations
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub requests_received: u64,
    pub offers_opened: u64,
    pub offers_confirmed: u64,
    pub offers_failed: u64,
    pub sessions_ended: u64,
    pub rematches_requested: u64,
    pub users_waiting: usize,
    pub active_offers: usize,
    pub active_sessions: usize,
}

/// A finished pairing remembered for rematch authorization
#[derive(Debug, Clone)]
struct RecentPair {
    user_a: UserId,
    user_b: UserId,
    finished_at: DateTime<Utc>,
}

/// All mutable coordinator state, serialized behind one lock so every
/// logical transition is atomic (single-owner discipline)
#[derive(Default)]
struct CoordinatorState {
    pool: WaitingPool,
    offers: OfferBoard,
    sessions: SessionBoard,
    registry: ConnectionRegistry,
    recent_pairs: HashMap<MatchId, RecentPair>,
}

/// Events queued under the lock, dispatched after it is released
type Outbox = Vec<(UserId, OutboundEvent)>;

/// The main coordinator
#[derive(Clone)]
pub struct MatchCoordinator {
    state: Arc<RwLock<CoordinatorState>>,
    gateway: Arc<dyn EventGateway>,
    questions: Arc<dyn QuestionSelector>,
    settings: MatchmakingSettings,
    stats: Arc<RwLock<CoordinatorStats>>,
    metrics: Arc<MetricsCollector>,
}

impl MatchCoordinator {
    pub fn new(
        gateway: Arc<dyn EventGateway>,
        questions: Arc<dyn QuestionSelector>,
        settings: MatchmakingSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(CoordinatorState::default())),
            gateway,
            questions,
            settings,
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
            metrics,
        }
    }

    /// Dispatch one inbound protocol event
    pub async fn handle_inbound(&self, event: InboundEvent, connection_id: ConnectionId) -> Result<()> {
        debug!("Inbound event from connection {}: {:?}", connection_id, event);
        match event {
            InboundEvent::UserConnected { user_id } => {
                self.handle_user_connected(&user_id, connection_id)
            }
            InboundEvent::UserDisconnected { user_id } => {
                self.handle_user_disconnected(&user_id, connection_id)
            }
            InboundEvent::MatchRequest {
                correlation_id,
                user_id,
                complexity,
                category,
                language,
                timeout_seconds,
            } => {
                let criteria = criteria_of(complexity, &category, &language);
                self.handle_match_request(correlation_id, &user_id, criteria, timeout_seconds)
                    .await
            }
            InboundEvent::MatchCancelRequest { user_id } => {
                self.handle_match_cancel(&user_id).await
            }
            InboundEvent::MatchAcceptRequest { user_id, match_id } => {
                self.handle_match_accept(&user_id, match_id).await
            }
            InboundEvent::MatchDeclineRequest {
                user_id,
                match_id,
                is_timeout,
            } => self.handle_match_decline(&user_id, match_id, is_timeout).await,
            InboundEvent::RematchRequest {
                correlation_id,
                user_id,
                match_id,
                partner_id,
                complexity,
                category,
                language,
            } => {
                let criteria = criteria_of(complexity, &category, &language);
                self.handle_rematch(correlation_id, &user_id, match_id, &partner_id, criteria)
                    .await
            }
            InboundEvent::MatchEndRequest { user_id, match_id } => {
                self.handle_match_end(&user_id, match_id).await
            }
        }
    }

    /// Bind a live connection; a reconnect within grace cancels the timer
    pub fn handle_user_connected(&self, user_id: &str, connection_id: ConnectionId) -> Result<()> {
        let mut state = self.write_state()?;
        state.registry.identify(user_id, connection_id);
        let now = current_timestamp();
        self.metrics
            .connected_users
            .set(state.registry.reachable_count(now) as i64);
        info!("User {} connected ({})", user_id, connection_id);
        Ok(())
    }

    /// Start the grace timer; the user stays reachable until it lapses
    pub fn handle_user_disconnected(&self, user_id: &str, connection_id: ConnectionId) -> Result<()> {
        let grace = Duration::seconds(self.settings.grace_window_seconds as i64);
        let mut state = self.write_state()?;
        if state.registry.mark_disconnected(user_id, connection_id, grace) {
            info!(
                "User {} disconnected, grace window {}s started",
                user_id, self.settings.grace_window_seconds
            );
        } else {
            debug!(
                "Stale disconnect for user {} on connection {} ignored",
                user_id, connection_id
            );
        }
        Ok(())
    }

    /// Submit a match request: pair immediately or enqueue
    pub async fn handle_match_request(
        &self,
        correlation_id: Uuid,
        user_id: &str,
        criteria: MatchCriteria,
        timeout_seconds: u64,
    ) -> Result<()> {
        self.metrics.requests_total.inc();
        {
            let mut stats = self.write_stats()?;
            stats.requests_received += 1;
        }

        let outbox = {
            let mut state = self.write_state()?;

            // One active enrollment per user across pool, offers and sessions
            if state.pool.contains_user(user_id)
                || state.offers.has_user(user_id)
                || state.sessions.active_for_user(user_id).is_some()
            {
                warn!("Duplicate match request from user {}", user_id);
                vec![(
                    user_id.to_string(),
                    OutboundEvent::MatchRequestExists { correlation_id },
                )]
            } else {
                let now = current_timestamp();
                let timeout = timeout_seconds.min(self.settings.max_request_timeout_seconds);
                let request = MatchRequest {
                    user_id: user_id.to_string(),
                    criteria: criteria.clone(),
                    requested_at: now,
                    expires_at: now + Duration::seconds(timeout as i64),
                };

                match state.pool.submit(request) {
                    Ok(SubmitOutcome::Enqueued) => {
                        info!(
                            "User {} enqueued for {}/{}/{} (timeout {}s)",
                            user_id, criteria.complexity, criteria.category, criteria.language,
                            timeout
                        );
                        vec![(
                            user_id.to_string(),
                            OutboundEvent::MatchRequestAccepted { correlation_id },
                        )]
                    }
                    Ok(SubmitOutcome::Paired(partner)) => {
                        let mut outbox = vec![(
                            user_id.to_string(),
                            OutboundEvent::MatchRequestAccepted { correlation_id },
                        )];
                        self.open_offer(
                            &mut state,
                            partner.user_id,
                            user_id.to_string(),
                            criteria,
                            OfferSource::NewMatch,
                            &mut outbox,
                        )?;
                        outbox
                    }
                    Err(e) => self.nack_for_error(user_id, Some(correlation_id), &e),
                }
            }
        };

        self.dispatch(outbox).await
    }

    /// Cancel a waiting request, or an offer nobody has accepted yet
    pub async fn handle_match_cancel(&self, user_id: &str) -> Result<()> {
        let outbox = {
            let mut state = self.write_state()?;
            match self.cancel_locked(&mut state, user_id) {
                Ok(outbox) => outbox,
                Err(e) => self.nack_for_error(user_id, None, &e),
            }
        };
        self.dispatch(outbox).await
    }

    fn cancel_locked(&self, state: &mut CoordinatorState, user_id: &str) -> Result<Outbox> {
        if state.pool.contains_user(user_id) {
            state.pool.cancel(user_id)?;
            info!("User {} cancelled their waiting request", user_id);
            self.metrics.users_waiting.set(state.pool.waiting_count() as i64);
            return Ok(Vec::new());
        }

        // A cancel sent while the pairing was in flight lands after
        // MATCH_FOUND; it aborts the offer as long as it is still PENDING.
        // Once either party accepted, backing out is a decline.
        let match_id = state
            .offers
            .offer_for_user(user_id)
            .map(|offer| offer.match_id)
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: format!("waiting request for user {}", user_id),
            })?;
        state.offers.get_mut(&match_id)?.cancel(user_id)?;
        info!("Offer {} cancelled by {}", match_id, user_id);
        self.close_failed_offer(state, match_id)
    }

    /// Accept an offer; the second accept confirms and creates the session
    pub async fn handle_match_accept(&self, user_id: &str, match_id: MatchId) -> Result<()> {
        // Select a question before taking the write lock, so confirmation and
        // session creation commit in one atomic step. Unused when this turns
        // out to be only the first accept.
        let criteria = {
            let state = self.read_state()?;
            match state.offers.get(&match_id) {
                Some(offer) if offer.is_party(user_id) => Some(offer.criteria.clone()),
                Some(_) | None => None,
            }
        };

        let question = match criteria {
            Some(criteria) => match self.questions.select_question(&criteria).await {
                Ok(question) => Some(question),
                Err(e) => {
                    error!("Question selection failed for match {}: {}", match_id, e);
                    None
                }
            },
            None => None,
        };

        let outbox = {
            let mut state = self.write_state()?;
            match self.accept_locked(&mut state, user_id, match_id, question) {
                Ok(outbox) => outbox,
                Err(e) => self.nack_for_error(user_id, None, &e),
            }
        };
        self.dispatch(outbox).await
    }

    fn accept_locked(
        &self,
        state: &mut CoordinatorState,
        user_id: &str,
        match_id: MatchId,
        question: Option<QuestionRef>,
    ) -> Result<Outbox> {
        let offer = state.offers.get_mut(&match_id)?;

        // A confirming accept must not proceed without a question; bail
        // before any transition so the offer stays answerable.
        let would_confirm = matches!(
            (offer.state, offer.user_a == user_id),
            (OfferState::AcceptedByA, false) | (OfferState::AcceptedByB, true)
        );
        if would_confirm && question.is_none() {
            return Err(CoordinatorError::InternalError {
                message: format!("No question available for match {}", match_id),
            }
            .into());
        }

        let outcome = offer.accept(user_id)?;
        match outcome {
            AcceptOutcome::AwaitingPartner | AcceptOutcome::AlreadyAccepted => {
                debug!("Offer {}: accept by {} recorded, awaiting partner", match_id, user_id);
                Ok(Vec::new())
            }
            AcceptOutcome::Confirmed => {
                let offer = state
                    .offers
                    .remove_terminal(&match_id)
                    .ok_or_else(|| CoordinatorError::InternalError {
                        message: format!("Confirmed offer {} missing from board", match_id),
                    })?;

                let question = question.ok_or_else(|| CoordinatorError::InternalError {
                    message: format!("No question selected for confirmed match {}", match_id),
                })?;

                let session = state.sessions.create(&offer, question)?;
                info!(
                    "Match {} confirmed: session {} in room {} for {} and {}",
                    match_id, session.session_id, session.room_id, offer.user_a, offer.user_b
                );

                self.metrics.record_offer_closed("confirmed");
                self.metrics.sessions_started_total.inc();
                {
                    let mut stats = self.write_stats()?;
                    stats.offers_confirmed += 1;
                }

                let success = OutboundEvent::MatchSuccessful {
                    match_id,
                    session_id: session.session_id,
                    room_id: session.room_id,
                    question_id: session.question.id.clone(),
                    title: session.question.title.clone(),
                };
                Ok(vec![
                    (offer.user_a.clone(), success.clone()),
                    (offer.user_b.clone(), success),
                ])
            }
        }
    }

    /// Decline an offer (or report a client-observed offer-window expiry)
    pub async fn handle_match_decline(
        &self,
        user_id: &str,
        match_id: MatchId,
        is_timeout: bool,
    ) -> Result<()> {
        let outbox = {
            let mut state = self.write_state()?;
            let result = state
                .offers
                .get_mut(&match_id)
                .and_then(|offer| offer.decline(user_id, is_timeout));
            match result {
                Ok(()) => self.close_failed_offer(&mut state, match_id)?,
                Err(e) => self.nack_for_error(user_id, None, &e),
            }
        };
        self.dispatch(outbox).await
    }

    /// Re-offer a pairing between two specific, previously paired users
    pub async fn handle_rematch(
        &self,
        correlation_id: Uuid,
        user_id: &str,
        match_id: MatchId,
        partner_id: &str,
        criteria: MatchCriteria,
    ) -> Result<()> {
        self.metrics.rematch_requests_total.inc();
        {
            let mut stats = self.write_stats()?;
            stats.rematches_requested += 1;
        }

        let outbox = {
            let mut state = self.write_state()?;
            match self.rematch_locked(&mut state, correlation_id, user_id, match_id, partner_id, criteria)
            {
                Ok(outbox) => outbox,
                Err(e) => {
                    let nack = match e.downcast_ref::<CoordinatorError>() {
                        Some(CoordinatorError::DuplicateRequest { .. }) => {
                            OutboundEvent::MatchRequestExists { correlation_id }
                        }
                        Some(err) => OutboundEvent::MatchRequestError {
                            correlation_id: Some(correlation_id),
                            code: ErrorCode::from(err),
                        },
                        None => OutboundEvent::MatchRequestError {
                            correlation_id: Some(correlation_id),
                            code: ErrorCode::Internal,
                        },
                    };
                    vec![(user_id.to_string(), nack)]
                }
            }
        };
        self.dispatch(outbox).await
    }

    fn rematch_locked(
        &self,
        state: &mut CoordinatorState,
        correlation_id: Uuid,
        user_id: &str,
        match_id: MatchId,
        partner_id: &str,
        criteria: MatchCriteria,
    ) -> Result<Outbox> {
        // The pair must actually have shared the referenced match
        let authorized = state
            .recent_pairs
            .get(&match_id)
            .map(|pair| {
                (pair.user_a == user_id && pair.user_b == partner_id)
                    || (pair.user_b == user_id && pair.user_a == partner_id)
            })
            .unwrap_or(false);
        if !authorized {
            return Err(CoordinatorError::NotAuthorized {
                user_id: user_id.to_string(),
                match_id: match_id.to_string(),
            }
            .into());
        }

        if state.pool.contains_user(user_id)
            || state.offers.has_user(user_id)
            || state.sessions.active_for_user(user_id).is_some()
        {
            return Err(CoordinatorError::DuplicateRequest {
                user_id: user_id.to_string(),
            }
            .into());
        }

        // Partner gone past grace is distinct from partner busy elsewhere
        let now = current_timestamp();
        if !state.registry.is_reachable(partner_id, now) {
            return Err(CoordinatorError::Unreachable {
                user_id: partner_id.to_string(),
            }
            .into());
        }
        if state.pool.contains_user(partner_id)
            || state.offers.has_user(partner_id)
            || state.sessions.active_for_user(partner_id).is_some()
        {
            return Err(CoordinatorError::PartnerUnavailable {
                partner_id: partner_id.to_string(),
            }
            .into());
        }

        let mut outbox = vec![(
            user_id.to_string(),
            OutboundEvent::MatchRequestAccepted { correlation_id },
        )];
        self.open_offer(
            state,
            user_id.to_string(),
            partner_id.to_string(),
            criteria,
            OfferSource::Rematch,
            &mut outbox,
        )?;
        Ok(outbox)
    }

    /// End an active session on a participant's request
    pub async fn handle_match_end(&self, user_id: &str, match_id: MatchId) -> Result<()> {
        let outbox = {
            let mut state = self.write_state()?;
            match self.end_locked(&mut state, user_id, match_id) {
                Ok(outbox) => outbox,
                Err(e) => self.nack_for_error(user_id, None, &e),
            }
        };
        self.dispatch(outbox).await
    }

    fn end_locked(
        &self,
        state: &mut CoordinatorState,
        user_id: &str,
        match_id: MatchId,
    ) -> Result<Outbox> {
        let (session_id, user_a, user_b) = state
            .sessions
            .by_match_id(&match_id)
            .map(|session| {
                (
                    session.session_id,
                    session.user_a.clone(),
                    session.user_b.clone(),
                )
            })
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: format!("session for match {}", match_id),
            })?;

        match state.sessions.end(&session_id, user_id)? {
            EndOutcome::Ended { partner } => {
                info!("Session {} ended by {}", session_id, user_id);
                // The rematch window opens when the session finishes, not
                // when the offer confirmed; a long session must still leave
                // a fresh pairing record behind.
                self.remember_pair(state, match_id, &user_a, &user_b);
                self.metrics.sessions_ended_total.inc();
                {
                    let mut stats = self.write_stats()?;
                    stats.sessions_ended += 1;
                }
                Ok(vec![(partner, OutboundEvent::SessionEnded { session_id })])
            }
            EndOutcome::AlreadyEnded => {
                debug!("Session {} already ended; end request is a no-op", session_id);
                Ok(Vec::new())
            }
        }
    }

    /// Fire all due timeouts: request expiry, offer windows, grace windows.
    ///
    /// Runs under one lock acquisition so a timeout cannot interleave with a
    /// concurrent accept/cancel on the same entity.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        let outbox = {
            let mut state = self.write_state()?;
            let mut outbox: Outbox = Vec::new();

            // Waiting requests past their caller-supplied deadline
            for request in state.pool.expired(now) {
                info!("Match request from {} expired unpaired", request.user_id);
                outbox.push((request.user_id, OutboundEvent::MatchUnavailable {}));
            }

            // Offers past the offer window
            for match_id in state.offers.due(now) {
                if let Ok(offer) = state.offers.get_mut(&match_id) {
                    offer.expire();
                }
                info!("Match offer {} timed out", match_id);
                outbox.extend(self.close_failed_offer(&mut state, match_id)?);
            }

            // Users whose grace window lapsed are gone
            for user_id in state.registry.expired(now) {
                info!("Grace window expired for user {}", user_id);
                self.handle_gone_user(&mut state, &user_id, now, &mut outbox)?;
            }

            // Housekeeping
            let rematch_window = Duration::seconds(self.settings.rematch_window_seconds as i64);
            state
                .recent_pairs
                .retain(|_, pair| now - pair.finished_at <= rematch_window);
            let retention =
                Duration::seconds(self.settings.ended_session_retention_seconds as i64);
            state.sessions.prune_ended(now, retention);

            self.refresh_gauges(&state, now)?;
            outbox
        };
        self.dispatch(outbox).await
    }

    /// Spawn the periodic sweep as a background task
    pub fn start_sweep_task(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!("Timeout sweep task started ({:?} interval)", interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(current_timestamp()).await {
                    error!("Timeout sweep failed: {}", e);
                }
            }
        })
    }

    /// Get current coordinator statistics
    pub fn stats(&self) -> Result<CoordinatorStats> {
        let state = self.read_state()?;
        let mut stats = self
            .stats
            .read()
            .map_err(|_| CoordinatorError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();
        stats.users_waiting = state.pool.waiting_count();
        stats.active_offers = state.offers.active_count();
        stats.active_sessions = state.sessions.active_count();
        Ok(stats)
    }

    // ---- internals ----

    /// Create a PENDING offer between two users and queue MATCH_FOUND to both
    fn open_offer(
        &self,
        state: &mut CoordinatorState,
        user_a: UserId,
        user_b: UserId,
        criteria: MatchCriteria,
        source: OfferSource,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let window = Duration::seconds(self.settings.offer_window_seconds as i64);
        let offer = MatchOffer::open(user_a.clone(), user_b.clone(), criteria, source, window);
        let match_id = offer.match_id;
        state.offers.insert(offer)?;

        info!(
            "Match offer {} opened between {} and {} ({:?})",
            match_id, user_a, user_b, source
        );
        self.metrics.offers_opened_total.inc();
        {
            let mut stats = self.write_stats()?;
            stats.offers_opened += 1;
        }

        let found = OutboundEvent::MatchFound {
            match_id,
            user1: user_a.clone(),
            user2: user_b.clone(),
        };
        outbox.push((user_a, found.clone()));
        outbox.push((user_b, found));
        Ok(())
    }

    /// Remove a failure-terminal offer, remember the pair, notify both sides
    fn close_failed_offer(&self, state: &mut CoordinatorState, match_id: MatchId) -> Result<Outbox> {
        let offer = state
            .offers
            .remove_terminal(&match_id)
            .ok_or_else(|| CoordinatorError::InternalError {
                message: format!("Offer {} not terminal when closing", match_id),
            })?;
        self.remember_pair(state, offer.match_id, &offer.user_a, &offer.user_b);

        let outcome = match offer.state {
            OfferState::Declined => "declined",
            OfferState::TimedOut => "timed_out",
            OfferState::Cancelled => "cancelled",
            other => {
                warn!("Offer {} closed in unexpected state {:?}", match_id, other);
                "other"
            }
        };
        self.metrics.record_offer_closed(outcome);
        {
            let mut stats = self.write_stats()?;
            stats.offers_failed += 1;
        }

        let failed = OutboundEvent::MatchUnsuccessful { match_id };
        Ok(vec![
            (offer.user_a.clone(), failed.clone()),
            (offer.user_b.clone(), failed),
        ])
    }

    /// Tear down everything a vanished user was enrolled in
    fn handle_gone_user(
        &self,
        state: &mut CoordinatorState,
        user_id: &str,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> Result<()> {
        // A waiting request from a gone user is abandoned silently
        if state.pool.contains_user(user_id) {
            let _ = state.pool.cancel(user_id);
            debug!("Dropped waiting request of gone user {}", user_id);
        }

        // A pending offer fails as a disconnect-induced timeout
        if let Some(offer) = state.offers.offer_for_user(user_id) {
            let match_id = offer.match_id;
            state.offers.get_mut(&match_id)?.fail_unreachable();
            info!("Offer {} failed: participant {} gone", match_id, user_id);
            outbox.extend(self.close_failed_offer(state, match_id)?);
        }

        // An active session survives one absence, ends when both are gone
        if let Some(session) = state.sessions.active_for_user(user_id) {
            let session_id = session.session_id;
            let match_id = session.match_id;
            let partner = session.partner_of(user_id).cloned();
            if let Some(partner) = partner {
                if state.registry.is_reachable(&partner, now) {
                    info!(
                        "Session {}: {} gone past grace, partner {} notified",
                        session_id, user_id, partner
                    );
                    outbox.push((partner, OutboundEvent::PartnerDisconnected { session_id }));
                } else {
                    info!("Session {} abandoned by both participants", session_id);
                    state.sessions.end_abandoned(&session_id);
                    self.remember_pair(state, match_id, user_id, &partner);
                    self.metrics.sessions_ended_total.inc();
                    let mut stats = self.write_stats()?;
                    stats.sessions_ended += 1;
                }
            }
        }
        Ok(())
    }

    /// Record a pairing that just finished, opening its rematch window
    fn remember_pair(&self, state: &mut CoordinatorState, match_id: MatchId, user_a: &str, user_b: &str) {
        state.recent_pairs.insert(
            match_id,
            RecentPair {
                user_a: user_a.to_string(),
                user_b: user_b.to_string(),
                finished_at: current_timestamp(),
            },
        );
    }

    /// Map a handler error to the nack event for the originating connection
    fn nack_for_error(
        &self,
        user_id: &str,
        correlation_id: Option<Uuid>,
        error: &anyhow::Error,
    ) -> Outbox {
        warn!("Request from {} rejected: {}", user_id, error);
        let code = error
            .downcast_ref::<CoordinatorError>()
            .map(ErrorCode::from)
            .unwrap_or(ErrorCode::Internal);
        vec![(
            user_id.to_string(),
            OutboundEvent::MatchRequestError {
                correlation_id,
                code,
            },
        )]
    }

    fn refresh_gauges(&self, state: &CoordinatorState, now: DateTime<Utc>) -> Result<()> {
        self.metrics.users_waiting.set(state.pool.waiting_count() as i64);
        self.metrics.active_offers.set(state.offers.active_count() as i64);
        self.metrics
            .active_sessions
            .set(state.sessions.active_count() as i64);
        self.metrics
            .connected_users
            .set(state.registry.reachable_count(now) as i64);
        Ok(())
    }

    async fn dispatch(&self, outbox: Outbox) -> Result<()> {
        for (user_id, event) in outbox {
            debug!("Dispatching {} to {}", event.name(), user_id);
            if let Err(e) = self.gateway.send(&user_id, event).await {
                warn!("Failed to dispatch event to {}: {}", user_id, e);
            }
        }
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, CoordinatorState>> {
        self.state.read().map_err(|_| {
            CoordinatorError::InternalError {
                message: "Failed to acquire coordinator state lock".to_string(),
            }
            .into()
        })
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, CoordinatorState>> {
        self.state.write().map_err(|_| {
            CoordinatorError::InternalError {
                message: "Failed to acquire coordinator state lock".to_string(),
            }
            .into()
        })
    }

    fn write_stats(&self) -> Result<std::sync::RwLockWriteGuard<'_, CoordinatorStats>> {
        self.stats.write().map_err(|_| {
            CoordinatorError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            }
            .into()
        })
    }

    #[cfg(test)]
    pub(crate) fn force_grace_deadline(&self, user_id: &str, deadline: Option<DateTime<Utc>>) {
        if let Ok(mut state) = self.state.write() {
            state.registry.set_grace_deadline(user_id, deadline);
        }
    }
}
