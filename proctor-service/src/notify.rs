//! Reviewer notification collaborator.
//!
//! The core only needs the "reviewer notified" side effect; delivery (chat
//! message, email, bot mention) belongs to the front-end. Notification
//! failures never roll back an assignment that already committed.

use async_trait::async_trait;
use tracing::info;

use proctor_core::{TrackerEntry, User};

/// Delivers the "you have been assigned a review" side effect.
#[async_trait]
pub trait ReviewerNotifier: Send + Sync {
    async fn reviewer_assigned(
        &self,
        reviewer: &User,
        trainee: &User,
        entry: &TrackerEntry,
    ) -> anyhow::Result<()>;
}

/// Notifier that only records the assignment in the service log.
///
/// Used when no front-end is wired up (local runs, tests).
pub struct LogNotifier;

#[async_trait]
impl ReviewerNotifier for LogNotifier {
    async fn reviewer_assigned(
        &self,
        reviewer: &User,
        trainee: &User,
        entry: &TrackerEntry,
    ) -> anyhow::Result<()> {
        info!(
            reviewer = %reviewer.username,
            trainee = %trainee.username,
            entry_id = %entry.id,
            commit = %entry.latest_commit.short(),
            "reviewer assigned"
        );
        Ok(())
    }
}
