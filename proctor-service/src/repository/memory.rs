//! In-memory implementation of `EntityRepository`.
//!
//! All state is held in memory and lost on restart. Used in tests and as the
//! reference behavior the SQLite backend must match.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use proctor_core::{
    Assertion, AssertionId, Assessment, AssessmentId, Badge, CommitSha, EntityKind, EntryId,
    NewAssertion, NewAssessment, NewTrackerEntry, NewUser, Reviewer, ReviewerId, TrackerEntry,
    User, UserId,
};

use super::{EntityRepository, RepositoryError};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    reviewers: HashMap<ReviewerId, Reviewer>,
    assessments: HashMap<AssessmentId, Assessment>,
    entries: HashMap<EntryId, TrackerEntry>,
    /// Keyed by external entity id, mirroring the upsert identity.
    badges: BTreeMap<String, Badge>,
    assertions: Vec<Assertion>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory entity repository.
///
/// A single `RwLock` guards all tables so multi-table writes stay atomic,
/// matching the transactional behavior of the SQLite backend.
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityRepository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::conflict(EntityKind::User, &user.username));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::conflict(EntityKind::User, &user.email));
        }
        let id = UserId(tables.next_id());
        let user = User {
            id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_reviewer(&self, user_id: UserId) -> Result<Reviewer, RepositoryError> {
        let mut tables = self.tables.write().await;
        let id = ReviewerId(tables.next_id());
        let reviewer = Reviewer { id, user_id };
        tables.reviewers.insert(id, reviewer);
        Ok(reviewer)
    }

    async fn reviewer_by_id(&self, id: ReviewerId) -> Result<Option<Reviewer>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.reviewers.get(&id).copied())
    }

    async fn reviewer_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .reviewers
            .values()
            .find(|r| r.user_id == user_id)
            .copied())
    }

    async fn reviewer_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReviewerId>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut ids: Vec<ReviewerId> = tables
            .reviewers
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn all_reviewer_ids(&self) -> Result<Vec<ReviewerId>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut ids: Vec<ReviewerId> = tables.reviewers.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<Assessment, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables
            .assessments
            .values()
            .any(|a| a.name == assessment.name)
        {
            return Err(RepositoryError::conflict(
                EntityKind::Assessment,
                &assessment.name,
            ));
        }
        let id = AssessmentId(tables.next_id());
        let assessment = Assessment {
            id,
            name: assessment.name,
            version: assessment.version,
            description: assessment.description,
            goals: assessment.goals,
            change_log: assessment.change_log,
            prerequisites: assessment.prerequisites,
        };
        tables.assessments.insert(id, assessment.clone());
        Ok(assessment)
    }

    async fn assessment_by_id(
        &self,
        id: AssessmentId,
    ) -> Result<Option<Assessment>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.assessments.get(&id).cloned())
    }

    async fn assessment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Assessment>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.assessments.values().find(|a| a.name == name).cloned())
    }

    async fn create_tracker_entry(
        &self,
        entry: NewTrackerEntry,
    ) -> Result<TrackerEntry, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables
            .entries
            .values()
            .any(|e| e.user_id == entry.user_id && e.assessment_id == entry.assessment_id)
        {
            return Err(RepositoryError::conflict(
                EntityKind::TrackerEntry,
                format!("user {} / assessment {}", entry.user_id, entry.assessment_id),
            ));
        }
        if tables
            .entries
            .values()
            .any(|e| e.latest_commit == entry.latest_commit)
        {
            return Err(RepositoryError::conflict(
                EntityKind::TrackerEntry,
                entry.latest_commit.0.clone(),
            ));
        }
        let id = EntryId(tables.next_id());
        let entry = TrackerEntry {
            id,
            user_id: entry.user_id,
            assessment_id: entry.assessment_id,
            reviewer_id: None,
            status: entry.status,
            latest_commit: entry.latest_commit,
            last_updated: entry.last_updated,
            log: entry.log,
        };
        tables.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn tracker_entry_for(
        &self,
        user_id: UserId,
        assessment_id: AssessmentId,
    ) -> Result<Option<TrackerEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .values()
            .find(|e| e.user_id == user_id && e.assessment_id == assessment_id)
            .cloned())
    }

    async fn tracker_entry_by_id(
        &self,
        id: EntryId,
    ) -> Result<Option<TrackerEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.entries.get(&id).cloned())
    }

    async fn tracker_entry_by_commit(
        &self,
        commit: &CommitSha,
    ) -> Result<Option<TrackerEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .values()
            .find(|e| &e.latest_commit == commit)
            .cloned())
    }

    async fn update_tracker_entry(&self, entry: &TrackerEntry) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables
            .entries
            .values()
            .any(|e| e.id != entry.id && e.latest_commit == entry.latest_commit)
        {
            return Err(RepositoryError::conflict(
                EntityKind::TrackerEntry,
                entry.latest_commit.0.clone(),
            ));
        }
        match tables.entries.get_mut(&entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(RepositoryError::corruption(format!(
                "tracker entry {} vanished during update",
                entry.id
            ))),
        }
    }

    async fn upsert_badges(&self, badges: Vec<Badge>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        for badge in badges {
            tables.badges.insert(badge.entity_id.clone(), badge);
        }
        Ok(())
    }

    async fn badge_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<Badge>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.badges.get(entity_id).cloned())
    }

    async fn all_badges(&self) -> Result<Vec<Badge>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.badges.values().cloned().collect())
    }

    async fn insert_assertion(
        &self,
        assertion: NewAssertion,
    ) -> Result<Assertion, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.entries.contains_key(&assertion.assessment_tracker_id) {
            return Err(RepositoryError::storage(
                "insert_assertion",
                format!(
                    "tracker entry {} does not exist",
                    assertion.assessment_tracker_id
                ),
            ));
        }
        let id = AssertionId(tables.next_id());
        let assertion = Assertion {
            id,
            assessment_tracker_id: assertion.assessment_tracker_id,
            badge_name: assertion.badge_name,
            fields: assertion.fields,
        };
        tables.assertions.push(assertion.clone());
        Ok(assertion)
    }

    async fn assertions_for_entry(
        &self,
        entry_id: EntryId,
    ) -> Result<Vec<Assertion>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .assertions
            .iter()
            .filter(|a| a.assessment_tracker_id == entry_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proctor_core::{AuditLog, LogEntry, TrackerStatus};

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: format!("{username}@example.org"),
        }
    }

    fn new_assessment(name: &str) -> NewAssessment {
        NewAssessment {
            name: name.to_string(),
            version: "1".to_string(),
            description: "desc".to_string(),
            goals: "goals".to_string(),
            change_log: serde_json::json!([]),
            prerequisites: vec![],
        }
    }

    fn new_entry(user_id: UserId, assessment_id: AssessmentId, commit: &str) -> NewTrackerEntry {
        let now = Utc::now();
        NewTrackerEntry {
            user_id,
            assessment_id,
            status: TrackerStatus::Initiated,
            latest_commit: CommitSha::from(commit),
            last_updated: now,
            log: AuditLog::starting_with(LogEntry::new(
                TrackerStatus::Initiated,
                now,
                CommitSha::from(commit),
            )),
        }
    }

    #[tokio::test]
    async fn test_lookups_return_none_for_missing() {
        let repo = MemoryRepository::new();
        assert!(repo.user_by_username("nobody").await.unwrap().is_none());
        assert!(repo.user_by_id(UserId(1)).await.unwrap().is_none());
        assert!(repo
            .tracker_entry_by_commit(&CommitSha::from("abc"))
            .await
            .unwrap()
            .is_none());
        assert!(repo.badge_by_entity_id("xyz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_then_lookup_user() {
        let repo = MemoryRepository::new();
        let created = repo.create_user(new_user("alice")).await.unwrap();

        let by_name = repo.user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name, created);

        let by_id = repo.user_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let repo = MemoryRepository::new();
        repo.create_user(new_user("alice")).await.unwrap();

        let mut dup = new_user("alice");
        dup.email = "other@example.org".to_string();
        let err = repo.create_user(dup).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_pair_conflicts() {
        let repo = MemoryRepository::new();
        let user = repo.create_user(new_user("alice")).await.unwrap();
        let assessment = repo
            .create_assessment(new_assessment("Python I"))
            .await
            .unwrap();

        repo.create_tracker_entry(new_entry(user.id, assessment.id, "abc"))
            .await
            .unwrap();
        let err = repo
            .create_tracker_entry(new_entry(user.id, assessment.id, "def"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_commit_conflicts_across_entries() {
        let repo = MemoryRepository::new();
        let alice = repo.create_user(new_user("alice")).await.unwrap();
        let bob = repo.create_user(new_user("bob")).await.unwrap();
        let assessment = repo
            .create_assessment(new_assessment("Python I"))
            .await
            .unwrap();

        repo.create_tracker_entry(new_entry(alice.id, assessment.id, "abc"))
            .await
            .unwrap();
        let err = repo
            .create_tracker_entry(new_entry(bob.id, assessment.id, "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_persists_log_growth() {
        let repo = MemoryRepository::new();
        let user = repo.create_user(new_user("alice")).await.unwrap();
        let assessment = repo
            .create_assessment(new_assessment("Python I"))
            .await
            .unwrap();
        let mut entry = repo
            .create_tracker_entry(new_entry(user.id, assessment.id, "abc"))
            .await
            .unwrap();

        entry.status = TrackerStatus::UnderReview;
        entry.log.append(LogEntry::new(
            TrackerStatus::UnderReview,
            Utc::now(),
            entry.latest_commit.clone(),
        ));
        repo.update_tracker_entry(&entry).await.unwrap();

        let reread = repo.tracker_entry_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(reread.status, TrackerStatus::UnderReview);
        assert_eq!(reread.log.len(), 2);
    }

    #[tokio::test]
    async fn test_reviewer_ids_for_user_only_returns_that_user() {
        let repo = MemoryRepository::new();
        let alice = repo.create_user(new_user("alice")).await.unwrap();
        let bob = repo.create_user(new_user("bob")).await.unwrap();

        let alice_rev = repo.create_reviewer(alice.id).await.unwrap();
        let bob_rev = repo.create_reviewer(bob.id).await.unwrap();

        let for_alice = repo.reviewer_ids_for_user(alice.id).await.unwrap();
        assert_eq!(for_alice, vec![alice_rev.id]);

        let all = repo.all_reviewer_ids().await.unwrap();
        assert!(all.contains(&alice_rev.id));
        assert!(all.contains(&bob_rev.id));
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_badge_upsert_replaces_by_entity_id() {
        let repo = MemoryRepository::new();

        let badge = |name: &str| Badge {
            entity_id: "ext-1".to_string(),
            name: name.to_string(),
            fields: BTreeMap::new(),
        };

        repo.upsert_badges(vec![badge("Old Name")]).await.unwrap();
        repo.upsert_badges(vec![badge("New Name")]).await.unwrap();

        let stored = repo.badge_by_entity_id("ext-1").await.unwrap().unwrap();
        assert_eq!(stored.name, "New Name");
        assert_eq!(repo.all_badges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assertion_requires_existing_entry() {
        let repo = MemoryRepository::new();
        let err = repo
            .insert_assertion(NewAssertion {
                assessment_tracker_id: EntryId(999),
                badge_name: "Python I".to_string(),
                fields: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage { .. }));
    }
}
