//! Error types for the matchmaking coordinator
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific coordination scenarios
///
/// Every variant is recovered locally: the coordinator maps it to a nack on
/// the originating connection and never terminates the process because of it.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("User already has an active request or offer: {user_id}")]
    DuplicateRequest { user_id: String },

    #[error("Entity not found: {entity}")]
    NotFound { entity: String },

    #[error("User {user_id} is not a party to match {match_id}")]
    NotAuthorized { user_id: String, match_id: String },

    #[error("Rematch partner is unavailable: {partner_id}")]
    PartnerUnavailable { partner_id: String },

    #[error("Window elapsed for {entity}")]
    Expired { entity: String },

    #[error("Counterpart exceeded the grace window: {user_id}")]
    Unreachable { user_id: String },

    #[error("Invalid protocol event: {reason}")]
    InvalidEvent { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal coordinator error: {message}")]
    InternalError { message: String },
}
