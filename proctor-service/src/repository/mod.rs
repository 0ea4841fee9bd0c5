//! Repository abstraction for entity persistence.
//!
//! This module defines the `EntityRepository` trait that is the sole access
//! path to stored entities: callers never filter or scan except through the
//! named read-paths below. Implementations provide different backends
//! (in-memory, SQLite).
//!
//! Reads return `Option` so callers branch on presence explicitly; the
//! operations layer converts absence into a `TrackerError::NotFound` naming
//! the entity kind. Writes that hit a uniqueness constraint surface
//! [`RepositoryError::Conflict`] with the offending key.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use thiserror::Error;

use proctor_core::{
    Assertion, Assessment, AssessmentId, Badge, CommitSha, EntityKind, EntryId, NewAssertion,
    NewAssessment, NewTrackerEntry, NewUser, Reviewer, ReviewerId, TrackerEntry, TrackerError,
    User, UserId,
};

/// Failures at the storage layer.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The backend failed to execute an operation.
    #[error("storage failure during {op}: {message}")]
    Storage { op: &'static str, message: String },

    /// Stored data could not be decoded back into its domain type.
    #[error("corrupt stored data: {what}")]
    Corruption { what: String },

    /// A write violated a uniqueness constraint.
    #[error("{kind} already exists: {key}")]
    Conflict { kind: EntityKind, key: String },
}

impl RepositoryError {
    pub fn storage(op: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            op,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption {
            what: what.into(),
        }
    }

    pub fn conflict(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            key: key.into(),
        }
    }
}

impl From<RepositoryError> for TrackerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict { kind, key } => TrackerError::AlreadyExists { kind, key },
            other => TrackerError::Storage(other.to_string()),
        }
    }
}

/// The sole access path to stored entities.
///
/// All lookups are exact-equality on a natural key. Multi-row writes
/// (`upsert_badges`) are all-or-nothing: a failure part-way rolls back the
/// whole batch before the error surfaces.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    // Users

    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError>;

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    // Reviewers

    async fn create_reviewer(&self, user_id: UserId) -> Result<Reviewer, RepositoryError>;

    async fn reviewer_by_id(&self, id: ReviewerId) -> Result<Option<Reviewer>, RepositoryError>;

    async fn reviewer_by_user(&self, user_id: UserId)
        -> Result<Option<Reviewer>, RepositoryError>;

    /// Reviewer ids whose underlying user is the given user.
    async fn reviewer_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReviewerId>, RepositoryError>;

    async fn all_reviewer_ids(&self) -> Result<Vec<ReviewerId>, RepositoryError>;

    // Assessments

    async fn create_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<Assessment, RepositoryError>;

    async fn assessment_by_id(
        &self,
        id: AssessmentId,
    ) -> Result<Option<Assessment>, RepositoryError>;

    async fn assessment_by_name(&self, name: &str)
        -> Result<Option<Assessment>, RepositoryError>;

    // Tracker entries

    async fn create_tracker_entry(
        &self,
        entry: NewTrackerEntry,
    ) -> Result<TrackerEntry, RepositoryError>;

    /// The entry for a (trainee, assessment) pair; at most one exists.
    async fn tracker_entry_for(
        &self,
        user_id: UserId,
        assessment_id: AssessmentId,
    ) -> Result<Option<TrackerEntry>, RepositoryError>;

    async fn tracker_entry_by_id(
        &self,
        id: EntryId,
    ) -> Result<Option<TrackerEntry>, RepositoryError>;

    /// Lookup by latest commit, which is globally unique across entries.
    async fn tracker_entry_by_commit(
        &self,
        commit: &CommitSha,
    ) -> Result<Option<TrackerEntry>, RepositoryError>;

    /// Persist the current state of an entry (status, reviewer, commit,
    /// timestamp, log) in one atomic write, keyed by the entry id.
    async fn update_tracker_entry(&self, entry: &TrackerEntry) -> Result<(), RepositoryError>;

    // Badges

    /// Upsert the given badges by external entity id, all within a single
    /// transaction. Partial catalog updates are never persisted.
    async fn upsert_badges(&self, badges: Vec<Badge>) -> Result<(), RepositoryError>;

    async fn badge_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<Badge>, RepositoryError>;

    async fn all_badges(&self) -> Result<Vec<Badge>, RepositoryError>;

    // Assertions

    async fn insert_assertion(
        &self,
        assertion: NewAssertion,
    ) -> Result<Assertion, RepositoryError>;

    async fn assertions_for_entry(
        &self,
        entry_id: EntryId,
    ) -> Result<Vec<Assertion>, RepositoryError>;
}
