//! Practice Room - Matchmaking and paired-session coordinator
//!
//! This crate pairs users of a peer-practice coding platform by exercise
//! criteria, runs the mutual-acceptance handshake over WebSocket, and
//! tracks the resulting collaboration sessions and connection liveness.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod offer;
pub mod pool;
pub mod question;
pub mod registry;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{CoordinatorError, Result};
pub use types::*;

// Re-export key components
pub use coordinator::MatchCoordinator;
pub use gateway::EventGateway;
pub use question::{QuestionSelector, StaticQuestionSelector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
