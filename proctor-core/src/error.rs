//! Error taxonomy for the tracker core.
//!
//! Every failure names the exact precondition that was violated; callers
//! (the transport layer, ultimately) map variants to their own status codes
//! without parsing message strings.

use thiserror::Error;

use crate::status::TrackerStatus;

/// The kind of entity a lookup or creation failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Reviewer,
    Assessment,
    TrackerEntry,
    Badge,
    Assertion,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::Reviewer => "reviewer",
            Self::Assessment => "assessment",
            Self::TrackerEntry => "assessment tracker entry",
            Self::Badge => "badge",
            Self::Assertion => "assertion",
        };
        write!(f, "{}", name)
    }
}

/// Failures surfaced by tracker operations.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: EntityKind, key: String },

    #[error("reviewer cannot be the same as the trainee: {username}")]
    SelfReview { username: String },

    #[error("no reviewer is assigned to the assessment")]
    NoReviewerAssigned,

    #[error("assessment is not under review (status: {status})")]
    NotUnderReview { status: TrackerStatus },

    #[error("cannot move assessment from {from} back to {to}")]
    StatusRegression {
        from: TrackerStatus,
        to: TrackerStatus,
    },

    #[error("checks failed for latest commit {commit}")]
    ChecksFailed { commit: String },

    #[error("approval must come from the assigned reviewer {assigned}, not {claimed}")]
    ReviewerMismatch { assigned: String, claimed: String },

    /// Fatal operational condition: requires administrator intervention,
    /// never retried automatically.
    #[error("no reviewer available; contact an administrator")]
    NoReviewerAvailable,

    #[error("badge not found in the local catalog: {entity_id}")]
    BadgeNotFound { entity_id: String },

    #[error("external collaborator failure: {0}")]
    ExternalSync(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl TrackerError {
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.into(),
        }
    }
}
