use chrono::{DateTime, Utc};

use crate::gateway::GatewayError;

/// Unlock code requested or checked too early
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("unlock code is not revealed until {}", .reveal_at.format("%H:%M:%S UTC"))]
    NotYetRevealed { reveal_at: DateTime<Utc> },
}

/// Rejected session operation
///
/// Caller errors leave the session untouched. A gateway failure on start also leaves
/// the session Idle so the caller can retry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("select at least one platform to block")]
    InvalidSelection,

    #[error("a block session is already in progress")]
    SessionActive,

    #[error("block duration must be at least one hour")]
    InvalidDuration,

    #[error("no unlock is pending")]
    NotPendingUnlock,

    #[error("unlock code has not been verified")]
    NotVerified,

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("failed to start block: {0}")]
    Gateway(#[from] GatewayError),
}
