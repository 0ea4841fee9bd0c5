//! The operations surface consumed by the transport layer.
//!
//! `TrackerService` bundles the repository, the collaborator traits, and a
//! seedable randomness source, and exposes each workflow operation as a
//! plain request struct in, typed result out. Requests arrive already
//! validated; identity resolution happens here, then the state machine in
//! [`crate::tracker`] drives the transition.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use proctor_core::{
    Assertion, CommitSha, EntityKind, EntryId, NewUser, Reviewer, TrackerEntry, TrackerError,
    User,
};

use crate::checks::CheckVerifier;
use crate::notify::ReviewerNotifier;
use crate::reconciler::{self, AssertionPayload, AssertionWrangler, BadgeCatalogClient};
use crate::repository::EntityRepository;
use crate::selector;
use crate::tracker;

/// Register a new trainee or reviewer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Start tracking an assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub username: String,
    pub assessment_name: String,
    pub latest_commit: CommitSha,
}

/// Request a review of the work at the given commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub latest_commit: CommitSha,
}

/// Record a new commit on an existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub entry_id: EntryId,
    pub latest_commit: CommitSha,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Approve the work at the given commit, as the named reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub latest_commit: CommitSha,
    pub reviewer_username: String,
}

/// Read a tracker entry with its full audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRequest {
    pub username: String,
    pub assessment_name: String,
}

/// Result of a successful reviewer assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewAssignment {
    pub entry: TrackerEntry,
    pub reviewer: Reviewer,
    pub reviewer_username: String,
}

/// The tracker's operations surface.
pub struct TrackerService {
    repo: Arc<dyn EntityRepository>,
    checks: Arc<dyn CheckVerifier>,
    catalog: Arc<dyn BadgeCatalogClient>,
    wrangler: Arc<dyn AssertionWrangler>,
    notifier: Arc<dyn ReviewerNotifier>,
    rng: Mutex<StdRng>,
}

impl TrackerService {
    pub fn new(
        repo: Arc<dyn EntityRepository>,
        checks: Arc<dyn CheckVerifier>,
        catalog: Arc<dyn BadgeCatalogClient>,
        wrangler: Arc<dyn AssertionWrangler>,
        notifier: Arc<dyn ReviewerNotifier>,
    ) -> Self {
        Self {
            repo,
            checks,
            catalog,
            wrangler,
            notifier,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the selection randomness with a fixed seed, for reproducible
    /// reviewer selection in tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Register a new user identity.
    pub async fn register_user(&self, req: RegisterRequest) -> Result<User, TrackerError> {
        let user = self
            .repo
            .create_user(NewUser {
                username: req.username,
                first_name: req.first_name,
                last_name: req.last_name,
                email: req.email,
            })
            .await?;
        Ok(user)
    }

    /// Start tracking an assessment for a trainee.
    pub async fn initiate_tracker(
        &self,
        req: InitiateRequest,
    ) -> Result<TrackerEntry, TrackerError> {
        let user = self
            .repo
            .user_by_username(&req.username)
            .await?
            .ok_or_else(|| TrackerError::not_found(EntityKind::User, &req.username))?;
        let assessment = self
            .repo
            .assessment_by_name(&req.assessment_name)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::Assessment, &req.assessment_name)
            })?;

        tracker::initiate(self.repo.as_ref(), &user, &assessment, req.latest_commit).await
    }

    /// Auto-select a reviewer for the entry at the given commit and assign
    /// them, then fire the "reviewer notified" side effect.
    pub async fn assign_reviewer(
        &self,
        req: ReviewRequest,
    ) -> Result<ReviewAssignment, TrackerError> {
        let entry = self
            .repo
            .tracker_entry_by_commit(&req.latest_commit)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::TrackerEntry, &req.latest_commit.0)
            })?;

        let reviewer = {
            let mut rng = self.rng.lock().await;
            selector::select_reviewer(self.repo.as_ref(), &entry, &mut *rng).await?
        };
        let reviewer_user = self
            .repo
            .user_by_id(reviewer.user_id)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::User, reviewer.user_id.to_string())
            })?;

        let entry = tracker::assign_reviewer(
            self.repo.as_ref(),
            &entry,
            &reviewer,
            &reviewer_user.username,
        )
        .await?;

        // The assignment is already committed; a failed notification is an
        // operational nuisance, not a reason to unwind the transition.
        let trainee = self
            .repo
            .user_by_id(entry.user_id)
            .await?
            .ok_or_else(|| TrackerError::not_found(EntityKind::User, entry.user_id.to_string()))?;
        if let Err(e) = self
            .notifier
            .reviewer_assigned(&reviewer_user, &trainee, &entry)
            .await
        {
            warn!(
                reviewer = %reviewer_user.username,
                entry_id = %entry.id,
                "reviewer notification failed: {e:#}"
            );
        }

        Ok(ReviewAssignment {
            entry,
            reviewer,
            reviewer_username: reviewer_user.username,
        })
    }

    /// Record a new commit on an entry.
    pub async fn update_commit(&self, req: UpdateRequest) -> Result<TrackerEntry, TrackerError> {
        tracker::update_commit(self.repo.as_ref(), req.entry_id, req.latest_commit, req.extra)
            .await
    }

    /// Approve the assessment whose entry carries the given commit.
    pub async fn approve_assessment(
        &self,
        req: ApproveRequest,
    ) -> Result<TrackerEntry, TrackerError> {
        let entry = self
            .repo
            .tracker_entry_by_commit(&req.latest_commit)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::TrackerEntry, &req.latest_commit.0)
            })?;

        let trainee = self
            .repo
            .user_by_id(entry.user_id)
            .await?
            .ok_or_else(|| TrackerError::not_found(EntityKind::User, entry.user_id.to_string()))?;
        let assessment = self
            .repo
            .assessment_by_id(entry.assessment_id)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::Assessment, entry.assessment_id.to_string())
            })?;

        let claimant = self
            .repo
            .user_by_username(&req.reviewer_username)
            .await?
            .ok_or_else(|| TrackerError::not_found(EntityKind::User, &req.reviewer_username))?;
        let reviewer = self
            .repo
            .reviewer_by_user(claimant.id)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::Reviewer, &req.reviewer_username)
            })?;

        tracker::approve(
            self.repo.as_ref(),
            self.checks.as_ref(),
            &trainee,
            &reviewer,
            &req.reviewer_username,
            &assessment,
        )
        .await
    }

    /// Read a tracker entry with its full ordered audit log.
    pub async fn view_tracker(&self, req: ViewRequest) -> Result<TrackerEntry, TrackerError> {
        let user = self
            .repo
            .user_by_username(&req.username)
            .await?
            .ok_or_else(|| TrackerError::not_found(EntityKind::User, &req.username))?;
        let assessment = self
            .repo
            .assessment_by_name(&req.assessment_name)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(EntityKind::Assessment, &req.assessment_name)
            })?;

        self.repo
            .tracker_entry_for(user.id, assessment.id)
            .await?
            .ok_or_else(|| {
                TrackerError::not_found(
                    EntityKind::TrackerEntry,
                    format!("{} / {}", req.username, req.assessment_name),
                )
            })
    }

    /// Mirror the external badge catalog into the local store.
    pub async fn sync_badge_catalog(&self) -> Result<usize, TrackerError> {
        reconciler::sync_catalog(self.repo.as_ref(), self.catalog.as_ref()).await
    }

    /// Attach an issued-credential record to a tracker entry.
    pub async fn attach_assertion(
        &self,
        entry_id: EntryId,
        payload: &AssertionPayload,
    ) -> Result<Assertion, TrackerError> {
        reconciler::add_assertion(
            self.repo.as_ref(),
            self.catalog.as_ref(),
            self.wrangler.as_ref(),
            entry_id,
            payload,
        )
        .await
    }
}
