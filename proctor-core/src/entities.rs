//! Entity types shared across the tracker.
//!
//! Id newtypes prevent mixing the various integer keys; `CommitSha` does the
//! same for commit strings. The structs here mirror the stored rows exactly:
//! anything the repository persists is representable without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dates::BadgeField;
use crate::log::AuditLog;
use crate::status::TrackerStatus;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_newtype!(
    /// Newtype for user ids.
    UserId
);
id_newtype!(
    /// Newtype for reviewer ids (distinct from the underlying user id).
    ReviewerId
);
id_newtype!(
    /// Newtype for assessment ids.
    AssessmentId
);
id_newtype!(
    /// Newtype for tracker entry ids.
    EntryId
);
id_newtype!(
    /// Newtype for assertion ids.
    AssertionId
);

/// Newtype for commit SHA to prevent mixing with other strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitSha(pub String);

impl CommitSha {
    /// Returns a truncated SHA for display (first 7 characters).
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommitSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered trainee or reviewer identity.
///
/// Created by registration and immutable afterwards as far as this core is
/// concerned. Unique on both id and username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Fields for creating a [`User`]; the repository assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Marks a user as eligible to review assessments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: ReviewerId,
    pub user_id: UserId,
}

/// Catalog entry describing one skill assessment. Read-mostly reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: AssessmentId,
    pub name: String,
    pub version: String,
    pub description: String,
    pub goals: String,
    pub change_log: serde_json::Value,
    pub prerequisites: Vec<AssessmentId>,
}

/// Fields for creating an [`Assessment`]; the repository assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssessment {
    pub name: String,
    pub version: String,
    pub description: String,
    pub goals: String,
    pub change_log: serde_json::Value,
    pub prerequisites: Vec<AssessmentId>,
}

/// The per-(trainee, assessment) record driving the review workflow.
///
/// Exactly one entry exists per (user, assessment) pair, and `latest_commit`
/// is globally unique across entries, so either serves as a lookup key.
/// `log` is append-only and records every transition in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub assessment_id: AssessmentId,
    pub reviewer_id: Option<ReviewerId>,
    pub status: TrackerStatus,
    pub latest_commit: CommitSha,
    pub last_updated: DateTime<Utc>,
    pub log: AuditLog,
}

/// Fields for creating a [`TrackerEntry`]; the repository assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackerEntry {
    pub user_id: UserId,
    pub assessment_id: AssessmentId,
    pub status: TrackerStatus,
    pub latest_commit: CommitSha,
    pub last_updated: DateTime<Utc>,
    pub log: AuditLog,
}

/// An external credential definition mirrored locally.
///
/// `entity_id` is the issuer's key and the upsert identity during catalog
/// sync. Field values keep whatever the issuer sent, with timestamps parsed
/// out where they are recognisable (see [`crate::dates`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub entity_id: String,
    pub name: String,
    pub fields: BTreeMap<String, BadgeField>,
}

/// An issued-credential record linked to an approved tracker entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: AssertionId,
    pub assessment_tracker_id: EntryId,
    pub badge_name: String,
    pub fields: BTreeMap<String, String>,
}

/// Fields for creating an [`Assertion`]; the repository assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssertion {
    pub assessment_tracker_id: EntryId,
    pub badge_name: String,
    pub fields: BTreeMap<String, String>,
}
