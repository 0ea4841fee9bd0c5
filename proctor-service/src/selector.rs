//! Reviewer selection for tracker entries.
//!
//! Selection is pure: it draws uniformly from the eligible set and has no
//! side effect. Assignment is a separate step (see [`crate::tracker`]).
//! The randomness source is injected so production can use entropy while
//! tests seed a fixed sequence.

use rand::Rng;
use tracing::debug;

use proctor_core::{EntityKind, Reviewer, ReviewerId, TrackerEntry, TrackerError};

use crate::repository::EntityRepository;

/// Choose a reviewer for the given tracker entry.
///
/// Reviewers whose underlying user is the entry's trainee are excluded, so
/// nobody ever reviews their own assessment. An empty eligible set is a
/// fatal operational condition (`NoReviewerAvailable`), not a retryable one.
pub async fn select_reviewer<R: Rng>(
    repo: &dyn EntityRepository,
    entry: &TrackerEntry,
    rng: &mut R,
) -> Result<Reviewer, TrackerError> {
    let excluded = repo.reviewer_ids_for_user(entry.user_id).await?;
    let all = repo.all_reviewer_ids().await?;

    let chosen = draw(&all, &excluded, rng)?;
    debug!(entry_id = %entry.id, reviewer_id = %chosen, "selected reviewer");

    repo.reviewer_by_id(chosen)
        .await?
        .ok_or_else(|| TrackerError::not_found(EntityKind::Reviewer, chosen.to_string()))
}

/// Uniform draw from `all` minus `excluded`.
fn draw<R: Rng>(
    all: &[ReviewerId],
    excluded: &[ReviewerId],
    rng: &mut R,
) -> Result<ReviewerId, TrackerError> {
    let eligible: Vec<ReviewerId> = all
        .iter()
        .copied()
        .filter(|id| !excluded.contains(id))
        .collect();

    if eligible.is_empty() {
        return Err(TrackerError::NoReviewerAvailable);
    }

    Ok(eligible[rng.gen_range(0..eligible.len())])
}
