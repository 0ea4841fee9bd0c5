//! Commit-check verification collaborator.
//!
//! Approval requires the latest commit's externally-reported checks to be
//! passing. The actual CI integration lives outside this crate; the core
//! only consumes the pass/fail answer.

use async_trait::async_trait;

use proctor_core::TrackerEntry;

/// Reports whether the latest commit's checks are passing for an entry.
#[async_trait]
pub trait CheckVerifier: Send + Sync {
    /// Returns `Ok(true)` when the entry's latest commit has passing checks.
    ///
    /// An `Err` means the check status could not be determined at all (the
    /// external system was unreachable); callers treat that as a distinct
    /// failure from a definitive "not passing".
    async fn verify(&self, entry: &TrackerEntry) -> anyhow::Result<bool>;
}
