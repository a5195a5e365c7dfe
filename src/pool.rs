//! Waiting pool and matching algorithm
//!
//! Outstanding match requests are bucketed by exact criteria; within a bucket
//! older requests are served first so no request starves while newer
//! compatible ones keep arriving. Submission either pairs immediately with
//! the longest-waiting compatible entry or enqueues the request.

use crate::error::{CoordinatorError, Result};
use crate::types::{MatchCriteria, MatchRequest, UserId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

/// Outcome of submitting a request to the pool
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Paired with the longest-waiting compatible request, which has been
    /// removed from the pool along with the submitted one
    Paired(MatchRequest),
    /// No compatible entry; the request is now waiting
    Enqueued,
}

/// FIFO waiting pool keyed by criteria bucket
#[derive(Debug, Default)]
pub struct WaitingPool {
    buckets: HashMap<MatchCriteria, VecDeque<MatchRequest>>,
    waiting_users: HashSet<UserId>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.waiting_users.contains(user_id)
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting_users.len()
    }

    /// Submit a request: pair with the oldest compatible entry or enqueue.
    ///
    /// Duplicate-enrollment checks against offers and sessions are the
    /// coordinator's responsibility; the pool only rejects a user already
    /// waiting here.
    pub fn submit(&mut self, request: MatchRequest) -> Result<SubmitOutcome> {
        if self.waiting_users.contains(&request.user_id) {
            return Err(CoordinatorError::DuplicateRequest {
                user_id: request.user_id,
            }
            .into());
        }

        if let Some(bucket) = self.buckets.get_mut(&request.criteria) {
            if let Some(partner) = bucket.pop_front() {
                self.waiting_users.remove(&partner.user_id);
                if bucket.is_empty() {
                    self.buckets.remove(&request.criteria);
                }
                return Ok(SubmitOutcome::Paired(partner));
            }
        }

        self.waiting_users.insert(request.user_id.clone());
        self.buckets
            .entry(request.criteria.clone())
            .or_default()
            .push_back(request);
        Ok(SubmitOutcome::Enqueued)
    }

    /// Remove a user's waiting request
    pub fn cancel(&mut self, user_id: &str) -> Result<MatchRequest> {
        if !self.waiting_users.remove(user_id) {
            return Err(CoordinatorError::NotFound {
                entity: format!("match request for user {}", user_id),
            }
            .into());
        }

        let mut removed = None;
        self.buckets.retain(|_, bucket| {
            if removed.is_none() {
                if let Some(pos) = bucket.iter().position(|r| r.user_id == user_id) {
                    removed = bucket.remove(pos);
                }
            }
            !bucket.is_empty()
        });

        removed.ok_or_else(|| {
            CoordinatorError::InternalError {
                message: format!("Waiting-user index out of sync for {}", user_id),
            }
            .into()
        })
    }

    /// Enqueue without attempting to pair, to set up multi-entry buckets
    #[cfg(test)]
    pub fn enqueue_for_test(&mut self, request: MatchRequest) {
        self.waiting_users.insert(request.user_id.clone());
        self.buckets
            .entry(request.criteria.clone())
            .or_default()
            .push_back(request);
    }

    /// Collect and remove requests whose caller-supplied deadline has passed
    pub fn expired(&mut self, now: DateTime<Utc>) -> Vec<MatchRequest> {
        let mut due = Vec::new();
        self.buckets.retain(|_, bucket| {
            bucket.retain(|request| {
                if now >= request.expires_at {
                    due.push(request.clone());
                    false
                } else {
                    true
                }
            });
            !bucket.is_empty()
        });

        for request in &due {
            self.waiting_users.remove(&request.user_id);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Complexity;
    use crate::utils::current_timestamp;
    use chrono::Duration;

    fn criteria(complexity: Complexity) -> MatchCriteria {
        MatchCriteria {
            complexity,
            category: "Arrays".to_string(),
            language: "Python".to_string(),
        }
    }

    fn request(user: &str, complexity: Complexity, timeout_secs: i64) -> MatchRequest {
        let now = current_timestamp();
        MatchRequest {
            user_id: user.to_string(),
            criteria: criteria(complexity),
            requested_at: now,
            expires_at: now + Duration::seconds(timeout_secs),
        }
    }

    #[test]
    fn test_first_request_enqueues() {
        let mut pool = WaitingPool::new();
        let outcome = pool.submit(request("u1", Complexity::Medium, 60)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Enqueued));
        assert!(pool.contains_user("u1"));
        assert_eq!(pool.waiting_count(), 1);
    }

    #[test]
    fn test_exact_criteria_pairs() {
        let mut pool = WaitingPool::new();
        pool.submit(request("u1", Complexity::Medium, 60)).unwrap();

        let outcome = pool.submit(request("u2", Complexity::Medium, 60)).unwrap();
        match outcome {
            SubmitOutcome::Paired(partner) => assert_eq!(partner.user_id, "u1"),
            other => panic!("Expected pairing, got {:?}", other),
        }
        assert_eq!(pool.waiting_count(), 0);
    }

    #[test]
    fn test_different_criteria_do_not_pair() {
        let mut pool = WaitingPool::new();
        pool.submit(request("u1", Complexity::Easy, 60)).unwrap();

        let outcome = pool.submit(request("u2", Complexity::Hard, 60)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Enqueued));
        assert_eq!(pool.waiting_count(), 2);
    }

    #[test]
    fn test_fifo_fairness_within_bucket() {
        let mut pool = WaitingPool::new();
        // Two entries waiting in the same bucket, r1 older than r2
        pool.enqueue_for_test(request("r1", Complexity::Medium, 60));
        pool.enqueue_for_test(request("r2", Complexity::Medium, 60));

        // Incoming compatible request pairs with the longest-waiting entry
        let outcome = pool.submit(request("r3", Complexity::Medium, 60)).unwrap();
        match outcome {
            SubmitOutcome::Paired(partner) => assert_eq!(partner.user_id, "r1"),
            other => panic!("Expected pairing with r1, got {:?}", other),
        }
        assert!(pool.contains_user("r2"));
    }

    #[test]
    fn test_duplicate_submission_rejected() {
        let mut pool = WaitingPool::new();
        pool.submit(request("u1", Complexity::Medium, 60)).unwrap();

        let err = pool
            .submit(request("u1", Complexity::Medium, 60))
            .unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::DuplicateRequest { .. }));
    }

    #[test]
    fn test_cancel_removes_request() {
        let mut pool = WaitingPool::new();
        pool.submit(request("u1", Complexity::Medium, 60)).unwrap();

        let removed = pool.cancel("u1").unwrap();
        assert_eq!(removed.user_id, "u1");
        assert_eq!(pool.waiting_count(), 0);

        // A fresh submission from the same user is accepted again
        let outcome = pool.submit(request("u1", Complexity::Medium, 60)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Enqueued));
    }

    #[test]
    fn test_cancel_missing_request_fails() {
        let mut pool = WaitingPool::new();
        let err = pool.cancel("nobody").unwrap_err();
        let err = err.downcast::<CoordinatorError>().unwrap();
        assert!(matches!(err, CoordinatorError::NotFound { .. }));
    }

    #[test]
    fn test_expiry_removes_and_reports() {
        let mut pool = WaitingPool::new();
        pool.submit(request("u1", Complexity::Medium, 5)).unwrap();
        pool.submit(request("u3", Complexity::Hard, 120)).unwrap();

        let later = current_timestamp() + Duration::seconds(10);
        let due = pool.expired(later);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, "u1");
        assert!(!pool.contains_user("u1"));
        assert!(pool.contains_user("u3"));
    }
}
