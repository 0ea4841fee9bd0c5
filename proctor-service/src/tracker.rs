//! The assessment tracker state machine.
//!
//! Owns every transition of a tracker entry: initiation, reviewer
//! assignment, commit updates, and approval. Each operation re-reads current
//! state through the repository, validates its preconditions in a fixed
//! order (so error reporting is deterministic), appends exactly one audit
//! log record, and persists the result in one atomic write.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use proctor_core::{
    Assessment, AuditLog, CommitSha, EntityKind, EntryId, LogEntry, NewTrackerEntry, Reviewer,
    TrackerEntry, TrackerError, TrackerStatus, User,
};

use crate::checks::CheckVerifier;
use crate::repository::EntityRepository;

/// Start tracking an assessment for a trainee.
///
/// Fails with `AlreadyExists` if an entry for this (trainee, assessment)
/// pair exists — re-initiation is always rejected, never silently merged.
pub async fn initiate(
    repo: &dyn EntityRepository,
    user: &User,
    assessment: &Assessment,
    commit: CommitSha,
) -> Result<TrackerEntry, TrackerError> {
    if repo
        .tracker_entry_for(user.id, assessment.id)
        .await?
        .is_some()
    {
        return Err(TrackerError::already_exists(
            EntityKind::TrackerEntry,
            format!("{} / {}", user.username, assessment.name),
        ));
    }

    let now = Utc::now();
    let entry = repo
        .create_tracker_entry(NewTrackerEntry {
            user_id: user.id,
            assessment_id: assessment.id,
            status: TrackerStatus::Initiated,
            latest_commit: commit.clone(),
            last_updated: now,
            log: AuditLog::starting_with(LogEntry::new(TrackerStatus::Initiated, now, commit)),
        })
        .await?;

    info!(
        trainee = %user.username,
        assessment = %assessment.name,
        entry_id = %entry.id,
        "assessment tracking initiated"
    );
    Ok(entry)
}

/// Assign a reviewer and move the entry under review.
///
/// Repeated assignment overwrites the reviewer on an entry that is already
/// under review; an approved entry can no longer be re-assigned (the
/// lifecycle never regresses).
pub async fn assign_reviewer(
    repo: &dyn EntityRepository,
    entry: &TrackerEntry,
    reviewer: &Reviewer,
    reviewer_username: &str,
) -> Result<TrackerEntry, TrackerError> {
    if !entry.status.can_advance_to(TrackerStatus::UnderReview) {
        return Err(TrackerError::StatusRegression {
            from: entry.status,
            to: TrackerStatus::UnderReview,
        });
    }

    let mut updated = entry.clone();
    updated.reviewer_id = Some(reviewer.id);
    updated.status = TrackerStatus::UnderReview;
    updated.last_updated = Utc::now();

    let mut extra = serde_json::Map::new();
    extra.insert("reviewer".to_string(), json!(reviewer.id.0));
    extra.insert("reviewer_username".to_string(), json!(reviewer_username));
    updated.log.append(
        LogEntry::new(
            TrackerStatus::UnderReview,
            updated.last_updated,
            updated.latest_commit.clone(),
        )
        .with_extra(extra),
    );

    repo.update_tracker_entry(&updated).await?;

    info!(
        entry_id = %updated.id,
        reviewer = %reviewer_username,
        "reviewer assigned, entry under review"
    );
    Ok(updated)
}

/// Record a new commit on an entry without changing its status.
///
/// `extra` keys are merged into the appended log record alongside the
/// required fields.
pub async fn update_commit(
    repo: &dyn EntityRepository,
    entry_id: EntryId,
    commit: CommitSha,
    extra: serde_json::Map<String, serde_json::Value>,
) -> Result<TrackerEntry, TrackerError> {
    let Some(mut entry) = repo.tracker_entry_by_id(entry_id).await? else {
        return Err(TrackerError::not_found(
            EntityKind::TrackerEntry,
            entry_id.to_string(),
        ));
    };

    entry.latest_commit = commit.clone();
    entry.last_updated = Utc::now();
    entry.log.append(
        LogEntry::new(entry.status, entry.last_updated, commit).with_extra(extra),
    );

    repo.update_tracker_entry(&entry).await?;

    info!(
        entry_id = %entry.id,
        commit = %entry.latest_commit.short(),
        "latest commit updated"
    );
    Ok(entry)
}

/// Approve an assessment under review.
///
/// The checks run in a fixed order and short-circuit on the first failure:
/// identity (self-review) before state, state before authorization
/// (reviewer mismatch). A failed check leaves the entry untouched.
pub async fn approve(
    repo: &dyn EntityRepository,
    checks: &dyn CheckVerifier,
    trainee: &User,
    reviewer: &Reviewer,
    reviewer_username: &str,
    assessment: &Assessment,
) -> Result<TrackerEntry, TrackerError> {
    if reviewer.user_id == trainee.id {
        return Err(TrackerError::SelfReview {
            username: trainee.username.clone(),
        });
    }

    let Some(mut entry) = repo.tracker_entry_for(trainee.id, assessment.id).await? else {
        return Err(TrackerError::not_found(
            EntityKind::TrackerEntry,
            format!("{} / {}", trainee.username, assessment.name),
        ));
    };

    let Some(assigned_id) = entry.reviewer_id else {
        return Err(TrackerError::NoReviewerAssigned);
    };

    if entry.status != TrackerStatus::UnderReview {
        return Err(TrackerError::NotUnderReview {
            status: entry.status,
        });
    }

    let passing = checks
        .verify(&entry)
        .await
        .map_err(|e| TrackerError::ExternalSync(format!("commit check verification: {e:#}")))?;
    if !passing {
        return Err(TrackerError::ChecksFailed {
            commit: entry.latest_commit.0.clone(),
        });
    }

    // Authorization: the approval must come from the reviewer actually
    // recorded on the entry, not merely any valid reviewer.
    let assigned = repo
        .reviewer_by_id(assigned_id)
        .await?
        .ok_or_else(|| TrackerError::not_found(EntityKind::Reviewer, assigned_id.to_string()))?;
    let assigned_user = repo
        .user_by_id(assigned.user_id)
        .await?
        .ok_or_else(|| TrackerError::not_found(EntityKind::User, assigned.user_id.to_string()))?;
    if assigned_user.username != reviewer_username {
        return Err(TrackerError::ReviewerMismatch {
            assigned: assigned_user.username,
            claimed: reviewer_username.to_string(),
        });
    }

    entry.status = TrackerStatus::Approved;
    entry.last_updated = Utc::now();
    let mut extra = serde_json::Map::new();
    extra.insert("reviewer".to_string(), json!(reviewer.id.0));
    entry.log.append(
        LogEntry::new(
            TrackerStatus::Approved,
            entry.last_updated,
            entry.latest_commit.clone(),
        )
        .with_extra(extra),
    );

    repo.update_tracker_entry(&entry).await?;

    info!(
        entry_id = %entry.id,
        trainee = %trainee.username,
        reviewer = %reviewer_username,
        "assessment approved"
    );
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proctor_core::{NewAssessment, NewUser};

    use crate::repository::MemoryRepository;

    /// Verifier with a fixed answer.
    struct StaticChecks(bool);

    #[async_trait]
    impl CheckVerifier for StaticChecks {
        async fn verify(&self, _entry: &TrackerEntry) -> anyhow::Result<bool> {
            Ok(self.0)
        }
    }

    /// Verifier whose external system is down.
    struct BrokenChecks;

    #[async_trait]
    impl CheckVerifier for BrokenChecks {
        async fn verify(&self, _entry: &TrackerEntry) -> anyhow::Result<bool> {
            anyhow::bail!("CI unreachable")
        }
    }

    async fn seed_user(repo: &MemoryRepository, username: &str) -> User {
        repo.create_user(NewUser {
            username: username.to_string(),
            first_name: username.to_string(),
            last_name: "Test".to_string(),
            email: format!("{username}@example.org"),
        })
        .await
        .unwrap()
    }

    async fn seed_assessment(repo: &MemoryRepository, name: &str) -> Assessment {
        repo.create_assessment(NewAssessment {
            name: name.to_string(),
            version: "1".to_string(),
            description: "desc".to_string(),
            goals: "goals".to_string(),
            change_log: serde_json::json!([]),
            prerequisites: vec![],
        })
        .await
        .unwrap()
    }

    /// Seeds a trainee, a distinct reviewer, and an assessment, and returns
    /// the entry after initiation + assignment (status Under review).
    async fn under_review(
        repo: &MemoryRepository,
    ) -> (User, User, Reviewer, Assessment, TrackerEntry) {
        let trainee = seed_user(repo, "alice").await;
        let reviewer_user = seed_user(repo, "bob").await;
        let reviewer = repo.create_reviewer(reviewer_user.id).await.unwrap();
        let assessment = seed_assessment(repo, "Python Programming I").await;

        let entry = initiate(repo, &trainee, &assessment, CommitSha::from("abc123"))
            .await
            .unwrap();
        let entry = assign_reviewer(repo, &entry, &reviewer, "bob").await.unwrap();

        (trainee, reviewer_user, reviewer, assessment, entry)
    }

    #[tokio::test]
    async fn test_initiate_creates_entry_with_one_log_record() {
        let repo = MemoryRepository::new();
        let trainee = seed_user(&repo, "alice").await;
        let assessment = seed_assessment(&repo, "Python Programming I").await;

        let entry = initiate(&repo, &trainee, &assessment, CommitSha::from("abc123"))
            .await
            .unwrap();

        assert_eq!(entry.status, TrackerStatus::Initiated);
        assert_eq!(entry.log.len(), 1);
        assert!(entry.reviewer_id.is_none());
        let first = &entry.log.entries()[0];
        assert_eq!(first.status, TrackerStatus::Initiated);
        assert_eq!(first.commit, CommitSha::from("abc123"));
    }

    #[tokio::test]
    async fn test_second_initiation_always_rejected() {
        let repo = MemoryRepository::new();
        let trainee = seed_user(&repo, "alice").await;
        let assessment = seed_assessment(&repo, "Python Programming I").await;

        initiate(&repo, &trainee, &assessment, CommitSha::from("abc123"))
            .await
            .unwrap();
        let err = initiate(&repo, &trainee, &assessment, CommitSha::from("def456"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_assignment_moves_under_review_and_logs_reviewer() {
        let repo = MemoryRepository::new();
        let (_, _, reviewer, _, entry) = under_review(&repo).await;

        assert_eq!(entry.status, TrackerStatus::UnderReview);
        assert_eq!(entry.reviewer_id, Some(reviewer.id));
        assert_eq!(entry.log.len(), 2);

        let last = entry.log.last().unwrap();
        assert_eq!(last.status, TrackerStatus::UnderReview);
        assert_eq!(last.extra["reviewer"], serde_json::json!(reviewer.id.0));
        assert_eq!(last.extra["reviewer_username"], serde_json::json!("bob"));
    }

    #[tokio::test]
    async fn test_reassignment_overwrites_mid_review() {
        let repo = MemoryRepository::new();
        let (_, _, _, _, entry) = under_review(&repo).await;

        let carol = seed_user(&repo, "carol").await;
        let carol_rev = repo.create_reviewer(carol.id).await.unwrap();

        let entry = assign_reviewer(&repo, &entry, &carol_rev, "carol")
            .await
            .unwrap();
        assert_eq!(entry.reviewer_id, Some(carol_rev.id));
        assert_eq!(entry.status, TrackerStatus::UnderReview);
        assert_eq!(entry.log.len(), 3);
    }

    #[tokio::test]
    async fn test_assignment_never_regresses_an_approved_entry() {
        let repo = MemoryRepository::new();
        let (trainee, _, reviewer, assessment, _) = under_review(&repo).await;

        let approved = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap();

        let err = assign_reviewer(&repo, &approved, &reviewer, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::StatusRegression { .. }));

        let reread = repo
            .tracker_entry_by_id(approved.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reread.status, TrackerStatus::Approved);
    }

    #[tokio::test]
    async fn test_update_commit_keeps_status_and_merges_extras() {
        let repo = MemoryRepository::new();
        let (_, _, _, _, entry) = under_review(&repo).await;

        let mut extra = serde_json::Map::new();
        extra.insert("note".to_string(), serde_json::json!("resubmission"));
        let entry = update_commit(&repo, entry.id, CommitSha::from("fff999"), extra)
            .await
            .unwrap();

        assert_eq!(entry.status, TrackerStatus::UnderReview);
        assert_eq!(entry.latest_commit, CommitSha::from("fff999"));
        assert_eq!(entry.log.len(), 3);
        let last = entry.log.last().unwrap();
        assert_eq!(last.commit, CommitSha::from("fff999"));
        assert_eq!(last.extra["note"], serde_json::json!("resubmission"));
    }

    #[tokio::test]
    async fn test_update_commit_unknown_entry_is_not_found() {
        let repo = MemoryRepository::new();
        let err = update_commit(
            &repo,
            EntryId(404),
            CommitSha::from("abc"),
            serde_json::Map::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_approve_happy_path() {
        let repo = MemoryRepository::new();
        let (trainee, _, reviewer, assessment, _) = under_review(&repo).await;

        let entry = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap();

        assert_eq!(entry.status, TrackerStatus::Approved);
        assert_eq!(entry.log.len(), 3);
        let last = entry.log.last().unwrap();
        assert_eq!(last.status, TrackerStatus::Approved);
        assert_eq!(last.commit, CommitSha::from("abc123"));
        assert_eq!(last.extra["reviewer"], serde_json::json!(reviewer.id.0));
    }

    #[tokio::test]
    async fn test_approve_rejects_self_review_regardless_of_state() {
        let repo = MemoryRepository::new();
        let trainee = seed_user(&repo, "alice").await;
        let own_reviewer = repo.create_reviewer(trainee.id).await.unwrap();
        let assessment = seed_assessment(&repo, "Python Programming I").await;

        // No tracker entry even exists: the identity check comes first.
        let err = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &own_reviewer,
            "alice",
            &assessment,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TrackerError::SelfReview { .. }));
    }

    #[tokio::test]
    async fn test_approve_requires_assigned_reviewer() {
        let repo = MemoryRepository::new();
        let trainee = seed_user(&repo, "alice").await;
        let bob = seed_user(&repo, "bob").await;
        let reviewer = repo.create_reviewer(bob.id).await.unwrap();
        let assessment = seed_assessment(&repo, "Python Programming I").await;

        initiate(&repo, &trainee, &assessment, CommitSha::from("abc123"))
            .await
            .unwrap();

        let err = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TrackerError::NoReviewerAssigned));
    }

    #[tokio::test]
    async fn test_approve_requires_under_review_status() {
        let repo = MemoryRepository::new();
        let (trainee, _, reviewer, assessment, _) = under_review(&repo).await;

        approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap();

        // Second approval: the entry is Approved, no longer under review.
        let err = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::NotUnderReview {
                status: TrackerStatus::Approved
            }
        ));
    }

    #[tokio::test]
    async fn test_approve_rejects_failing_checks() {
        let repo = MemoryRepository::new();
        let (trainee, _, reviewer, assessment, _) = under_review(&repo).await;

        let err = approve(
            &repo,
            &StaticChecks(false),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TrackerError::ChecksFailed { .. }));
    }

    #[tokio::test]
    async fn test_approve_surfaces_unreachable_check_system() {
        let repo = MemoryRepository::new();
        let (trainee, _, reviewer, assessment, _) = under_review(&repo).await;

        let err = approve(&repo, &BrokenChecks, &trainee, &reviewer, "bob", &assessment)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::ExternalSync(_)));
    }

    #[tokio::test]
    async fn test_approve_rejects_wrong_reviewer_without_mutation() {
        let repo = MemoryRepository::new();
        let (trainee, _, _, assessment, entry) = under_review(&repo).await;

        // Carol is a perfectly valid reviewer, just not the assigned one.
        let carol = seed_user(&repo, "carol").await;
        let carol_rev = repo.create_reviewer(carol.id).await.unwrap();

        let err = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &carol_rev,
            "carol",
            &assessment,
        )
        .await
        .unwrap_err();
        match err {
            TrackerError::ReviewerMismatch { assigned, claimed } => {
                assert_eq!(assigned, "bob");
                assert_eq!(claimed, "carol");
            }
            other => panic!("expected ReviewerMismatch, got {other}"),
        }

        // No partial mutation: status and log are untouched.
        let reread = repo.tracker_entry_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(reread.status, TrackerStatus::UnderReview);
        assert_eq!(reread.log.len(), 2);
    }

    #[tokio::test]
    async fn test_log_length_equals_transition_count() {
        let repo = MemoryRepository::new();
        let (trainee, _, reviewer, assessment, entry) = under_review(&repo).await;

        // Two commit updates, then approval: 2 (init+assign) + 2 + 1 = 5.
        let entry = update_commit(
            &repo,
            entry.id,
            CommitSha::from("c2"),
            serde_json::Map::new(),
        )
        .await
        .unwrap();
        update_commit(
            &repo,
            entry.id,
            CommitSha::from("c3"),
            serde_json::Map::new(),
        )
        .await
        .unwrap();
        let entry = approve(
            &repo,
            &StaticChecks(true),
            &trainee,
            &reviewer,
            "bob",
            &assessment,
        )
        .await
        .unwrap();

        assert_eq!(entry.log.len(), 5);
        let statuses: Vec<TrackerStatus> =
            entry.log.entries().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                TrackerStatus::Initiated,
                TrackerStatus::UnderReview,
                TrackerStatus::UnderReview,
                TrackerStatus::UnderReview,
                TrackerStatus::Approved,
            ]
        );
    }
}
